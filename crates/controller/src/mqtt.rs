use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Device-published status reports.
pub(crate) const STATUS_TOPIC: &str = "sprinkler_system_controller/picow/status";

/// Controller-published zone commands.
pub(crate) const COMMAND_TOPIC: &str = "sprinkler_system_controller/picow/command";

const ACTIVE_SUFFIX: &str = "Active";
const LAST_ON_SUFFIX: &str = "LastOnTime";

// ---------------------------------------------------------------------------
// Outbound commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    UpdateZoneState,
}

/// Requested relay state. Encoded on the wire as `1` (on) / `0` (off).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DesiredState {
    Off,
    On,
}

impl From<DesiredState> for u8 {
    fn from(s: DesiredState) -> u8 {
        match s {
            DesiredState::Off => 0,
            DesiredState::On => 1,
        }
    }
}

impl TryFrom<u8> for DesiredState {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(DesiredState::Off),
            1 => Ok(DesiredState::On),
            other => Err(format!("invalid zone state {other} (expected 0 or 1)")),
        }
    }
}

impl DesiredState {
    pub fn is_on(self) -> bool {
        self == DesiredState::On
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub command_type: CommandType,
    pub zone: String,
    pub state: DesiredState,
}

impl CommandMessage {
    pub fn update_zone_state(zone: impl Into<String>, state: DesiredState) -> Self {
        Self {
            command_type: CommandType::UpdateZoneState,
            zone: zone.into(),
            state,
        }
    }

    /// JSON payload as published on [`COMMAND_TOPIC`].
    pub fn to_wire(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

// ---------------------------------------------------------------------------
// Inbound status reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneReport {
    pub active: bool,
    /// `None` when the device reports "never" or omits the field.
    pub last_on: Option<String>,
}

/// Flat status report published by the device, e.g.
/// `{"messageType":"status","zone1Active":false,"zone1LastOnTime":"never"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatusReport {
    pub zones: BTreeMap<String, ZoneReport>,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    #[serde(rename = "messageType")]
    message_type: String,
    #[serde(flatten)]
    fields: BTreeMap<String, Value>,
}

/// Parse a status payload. Every `<zone>Active` boolean field yields one
/// zone entry; its `<zone>LastOnTime` companion is optional.
pub(crate) fn parse_status_report(payload: &[u8]) -> Result<DeviceStatusReport, String> {
    let raw: RawStatus =
        serde_json::from_slice(payload).map_err(|e| format!("bad status json: {e}"))?;

    if raw.message_type != "status" {
        return Err(format!("unexpected messageType '{}'", raw.message_type));
    }

    let mut zones = BTreeMap::new();
    for (key, value) in &raw.fields {
        let Some(zone_id) = key.strip_suffix(ACTIVE_SUFFIX) else {
            continue;
        };
        if zone_id.is_empty() {
            continue;
        }
        let active = value
            .as_bool()
            .ok_or_else(|| format!("field '{key}' is not a boolean"))?;

        let last_on = raw
            .fields
            .get(&format!("{zone_id}{LAST_ON_SUFFIX}"))
            .and_then(Value::as_str)
            .filter(|s| *s != "never")
            .map(str::to_string);

        zones.insert(zone_id.to_string(), ZoneReport { active, last_on });
    }

    Ok(DeviceStatusReport { zones })
}

// ===========================================================================
// Tests
// ===========================================================================
