use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::protocol::{self, ZoneCommand, ZoneStatus, LAST_ON_FORMAT};
use crate::valve::ValveBoard;

/// Relay board plus the per-zone bookkeeping reported back to the
/// controller.
pub(crate) struct Node {
    board: ValveBoard,
    last_on: BTreeMap<String, DateTime<Utc>>,
}

impl Node {
    pub(crate) fn new(board: ValveBoard) -> Self {
        Self {
            board,
            last_on: BTreeMap::new(),
        }
    }

    /// Decode and apply one command payload. Returns true when a relay was
    /// driven, false when the payload was malformed or named an unknown zone.
    pub(crate) fn handle_command(&mut self, payload: &[u8], now: DateTime<Utc>) -> bool {
        match protocol::parse_command(payload) {
            Ok(cmd) => self.apply(&cmd, now),
            Err(e) => {
                warn!("dropping command: {e}");
                false
            }
        }
    }

    pub(crate) fn apply(&mut self, cmd: &ZoneCommand, now: DateTime<Utc>) -> bool {
        if !self.board.set(&cmd.zone, cmd.on) {
            return false;
        }
        if cmd.on {
            self.last_on.insert(cmd.zone.clone(), now);
        }
        true
    }

    pub(crate) fn all_off(&mut self) {
        info!("releasing all relays");
        self.board.all_off();
    }

    pub(crate) fn status_report(&self) -> Value {
        protocol::status_report(self.board.zones().map(|zone| ZoneStatus {
            zone,
            active: self.board.is_on(zone).unwrap_or(false),
            last_on: self
                .last_on
                .get(zone)
                .map(|t| t.format(LAST_ON_FORMAT).to_string()),
        }))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
