//! Status listener: applies device status reports to the zone store.
//!
//! Invoked from the transport's event loop for every payload on the status
//! topic, concurrently with scheduler reads and processor writes. Device
//! reports are authoritative and overwrite any optimistic dispatch state.

use tracing::{debug, error, warn};

use crate::mqtt::parse_status_report;
use crate::store::ZoneStore;

/// Apply one status payload. Returns how many zones were updated; malformed
/// payloads are logged and dropped.
pub async fn handle_status(store: &ZoneStore, payload: &[u8]) -> usize {
    let report = match parse_status_report(payload) {
        Ok(r) => r,
        Err(e) => {
            error!(payload = %String::from_utf8_lossy(payload), "discarding status report: {e}");
            return 0;
        }
    };

    let mut updated = 0;
    for (zone_id, zone_report) in &report.zones {
        match store.zone(zone_id) {
            Some(zone) => {
                zone.flag.record_report(zone_report).await;
                updated += 1;
                debug!(zone = %zone_id, active = zone_report.active, "zone state reported");
            }
            None => warn!(zone = %zone_id, "status report for unknown zone"),
        }
    }
    updated
}

// ===========================================================================
// Tests
// ===========================================================================
