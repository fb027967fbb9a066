//! Wire format shared with the controller. Duplicated rather than shared as
//! a crate: the device only needs the command decoder and the flat status
//! encoder.

use serde::Deserialize;
use serde_json::{Map, Value};

pub(crate) const STATUS_TOPIC: &str = "sprinkler_system_controller/picow/status";
pub(crate) const COMMAND_TOPIC: &str = "sprinkler_system_controller/picow/command";

const UPDATE_ZONE_STATE: &str = "update_zone_state";
const NEVER: &str = "never";

/// Timestamp layout of `<zone>LastOnTime`.
pub(crate) const LAST_ON_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Debug, Deserialize)]
struct RawCommand {
    command_type: String,
    zone: String,
    state: u8,
}

/// A decoded `update_zone_state` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ZoneCommand {
    pub zone: String,
    pub on: bool,
}

pub(crate) fn parse_command(payload: &[u8]) -> Result<ZoneCommand, String> {
    let raw: RawCommand =
        serde_json::from_slice(payload).map_err(|e| format!("invalid command json: {e}"))?;

    if raw.command_type != UPDATE_ZONE_STATE {
        return Err(format!("unsupported command_type '{}'", raw.command_type));
    }
    let on = match raw.state {
        0 => false,
        1 => true,
        other => return Err(format!("invalid state {other} (expected 0 or 1)")),
    };
    Ok(ZoneCommand { zone: raw.zone, on })
}

/// One zone's entry in a status report.
pub(crate) struct ZoneStatus<'a> {
    pub zone: &'a str,
    pub active: bool,
    /// Already formatted with [`LAST_ON_FORMAT`].
    pub last_on: Option<String>,
}

/// Flat status report: `messageType` plus `<zone>Active` and
/// `<zone>LastOnTime` for every zone.
pub(crate) fn status_report<'a>(zones: impl IntoIterator<Item = ZoneStatus<'a>>) -> Value {
    let mut map = Map::new();
    map.insert("messageType".into(), Value::from("status"));
    for z in zones {
        map.insert(format!("{}Active", z.zone), Value::from(z.active));
        map.insert(
            format!("{}LastOnTime", z.zone),
            Value::from(z.last_on.unwrap_or_else(|| NEVER.to_string())),
        );
    }
    Value::Object(map)
}

// ===========================================================================
// Tests
// ===========================================================================
