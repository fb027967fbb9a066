//! In-memory zone state store.
//!
//! The zone/schedule graph is built once from config and never changes. The
//! only mutable part is each zone's [`ActiveFlag`], which carries its own
//! lock so different zones never contend. The scheduler takes read locks; the
//! task processor and the status listener take write locks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{Config, ScheduleItem};
use crate::mqtt::{DesiredState, ZoneReport};

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedStore = Arc<ZoneStore>;

// ---------------------------------------------------------------------------
// Active flag
// ---------------------------------------------------------------------------

/// Which path wrote the active flag last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateSource {
    /// Nothing has written the flag since startup.
    Initial,
    /// Optimistic write after a successful command dispatch.
    Dispatched,
    /// Device-observed state from a status report.
    Reported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveState {
    pub active: bool,
    pub source: StateSource,
    /// Last state dispatched to the device and not yet confirmed by a report.
    pub pending: Option<DesiredState>,
    /// Informational last-on time from the latest report.
    pub last_on: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ActiveState {
    fn default() -> Self {
        Self {
            active: false,
            source: StateSource::Initial,
            pending: None,
            last_on: None,
            updated_at: None,
        }
    }
}

/// Lock-guarded active state for one zone. Writes replace the whole value
/// under the write lock, so readers never observe a partial update.
#[derive(Debug, Default)]
pub struct ActiveFlag {
    inner: RwLock<ActiveState>,
}

impl ActiveFlag {
    pub async fn is_active(&self) -> bool {
        self.inner.read().await.active
    }

    pub async fn snapshot(&self) -> ActiveState {
        self.inner.read().await.clone()
    }

    /// Record a successful dispatch. Only a start moves the flag; a stop
    /// stays pending until the device confirms it.
    pub async fn record_dispatch(&self, state: DesiredState) {
        let mut st = self.inner.write().await;
        if state.is_on() {
            st.active = true;
            st.source = StateSource::Dispatched;
        }
        st.pending = Some(state);
        st.updated_at = Some(Utc::now());
    }

    /// Overwrite with device-reported state. Always wins over a dispatch.
    pub async fn record_report(&self, report: &ZoneReport) {
        let mut st = self.inner.write().await;
        st.active = report.active;
        st.source = StateSource::Reported;
        st.pending = None;
        st.last_on.clone_from(&report.last_on);
        st.updated_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// Zones
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Zone {
    pub id: String,
    pub friendly_name: String,
    pub location: String,
    /// Declaration order, not priority order.
    pub schedule: Vec<ScheduleItem>,
    pub flag: ActiveFlag,
}

#[derive(Debug, Default)]
pub struct ZoneStore {
    zones: BTreeMap<String, Zone>,
    connected: AtomicBool,
}

// ---------------------------------------------------------------------------
// JSON snapshot (what the reporting API returns)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSnapshot {
    pub zone_name: String,
    pub friendly_name: String,
    pub location: String,
    pub is_active: bool,
    pub source: StateSource,
    pub pending_state: Option<DesiredState>,
    pub last_on_time: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Construction & access
// ---------------------------------------------------------------------------

impl ZoneStore {
    pub fn from_config(config: &Config) -> Self {
        let zones = config
            .zone_list
            .iter()
            .map(|(id, entry)| {
                let zone = Zone {
                    id: id.clone(),
                    friendly_name: entry.friendly_name.clone(),
                    location: entry.location.clone(),
                    schedule: entry.schedule.clone(),
                    flag: ActiveFlag::default(),
                };
                (id.clone(), zone)
            })
            .collect();

        Self {
            zones,
            connected: AtomicBool::new(false),
        }
    }

    pub fn zone(&self, zone_id: &str) -> Option<&Zone> {
        self.zones.get(zone_id)
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Build the JSON-serialisable per-zone snapshot, ordered by zone id.
    pub async fn snapshot(&self) -> Vec<ZoneSnapshot> {
        let mut out = Vec::with_capacity(self.zones.len());
        for zone in self.zones.values() {
            let st = zone.flag.snapshot().await;
            out.push(ZoneSnapshot {
                zone_name: zone.id.clone(),
                friendly_name: zone.friendly_name.clone(),
                location: zone.location.clone(),
                is_active: st.active,
                source: st.source,
                pending_state: st.pending,
                last_on_time: st.last_on,
                updated_at: st.updated_at,
            });
        }
        out
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config;

    pub(crate) fn two_zone_store() -> ZoneStore {
        let cfg = config::parse(
            r#"{
                "appConfig": {"mqttBroker": "localhost", "mqttPort": 1883},
                "zoneList": {
                    "zone2": {"friendlyName": "Garden", "location": "back", "schedule": []},
                    "zone1": {"friendlyName": "Lawn", "location": "front",
                              "schedule": [{"startTime": "10:00:00", "durationMinutes": 15, "weekdays": 127}]}
                }
            }"#,
        )
        .unwrap();
        ZoneStore::from_config(&cfg)
    }

    fn report(active: bool) -> ZoneReport {
        ZoneReport {
            active,
            last_on: Some("2024-07-05 16:40:01 UTC".into()),
        }
    }

    #[tokio::test]
    async fn new_store_all_inactive() {
        let store = two_zone_store();
        assert_eq!(store.zone_count(), 2);
        for zone in store.zones() {
            assert!(!zone.flag.is_active().await);
            assert_eq!(zone.flag.snapshot().await.source, StateSource::Initial);
        }
        assert!(!store.is_connected());
    }

    #[tokio::test]
    async fn dispatch_start_sets_active_optimistically() {
        let store = two_zone_store();
        let flag = &store.zone("zone1").unwrap().flag;
        flag.record_dispatch(DesiredState::On).await;

        let st = flag.snapshot().await;
        assert!(st.active);
        assert_eq!(st.source, StateSource::Dispatched);
        assert_eq!(st.pending, Some(DesiredState::On));
    }

    #[tokio::test]
    async fn dispatch_stop_leaves_flag_pending() {
        let store = two_zone_store();
        let flag = &store.zone("zone1").unwrap().flag;
        flag.record_report(&report(true)).await;
        flag.record_dispatch(DesiredState::Off).await;

        let st = flag.snapshot().await;
        assert!(st.active, "stop must wait for device confirmation");
        assert_eq!(st.source, StateSource::Reported);
        assert_eq!(st.pending, Some(DesiredState::Off));
    }

    #[tokio::test]
    async fn report_overrides_dispatch() {
        let store = two_zone_store();
        let flag = &store.zone("zone1").unwrap().flag;
        flag.record_dispatch(DesiredState::On).await;
        flag.record_report(&report(false)).await;

        let st = flag.snapshot().await;
        assert!(!st.active);
        assert_eq!(st.source, StateSource::Reported);
        assert_eq!(st.pending, None);
        assert_eq!(st.last_on.as_deref(), Some("2024-07-05 16:40:01 UTC"));
    }

    #[tokio::test]
    async fn zones_do_not_share_state() {
        let store = two_zone_store();
        store.zone("zone1").unwrap().flag.record_dispatch(DesiredState::On).await;
        assert!(store.zone("zone1").unwrap().flag.is_active().await);
        assert!(!store.zone("zone2").unwrap().flag.is_active().await);
    }

    #[tokio::test]
    async fn snapshot_is_sorted_by_zone_id() {
        let store = two_zone_store();
        store.zone("zone2").unwrap().flag.record_report(&report(true)).await;

        let snap = store.snapshot().await;
        let names: Vec<&str> = snap.iter().map(|z| z.zone_name.as_str()).collect();
        assert_eq!(names, ["zone1", "zone2"]);
        assert!(snap[1].is_active);
        assert_eq!(snap[1].friendly_name, "Garden");
    }

    #[test]
    fn connected_flag_round_trips() {
        let store = two_zone_store();
        store.set_connected(true);
        assert!(store.is_connected());
        store.set_connected(false);
        assert!(!store.is_connected());
    }

    /// Hammer one flag from dispatch writers, report writers and readers at
    /// once; every observation must be a coherent state.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_never_tear_state() {
        let store: SharedStore = Arc::new(two_zone_store());
        let mut handles = Vec::new();

        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let flag = &store.zone("zone1").unwrap().flag;
                for n in 0..500 {
                    if i % 2 == 0 {
                        flag.record_dispatch(DesiredState::On).await;
                    } else {
                        flag.record_report(&report(n % 2 == 0)).await;
                    }
                }
            }));
        }

        for _ in 0..4 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let flag = &store.zone("zone1").unwrap().flag;
                for _ in 0..500 {
                    let st = flag.snapshot().await;
                    match st.source {
                        StateSource::Dispatched => {
                            assert!(st.active);
                            assert_eq!(st.pending, Some(DesiredState::On));
                        }
                        StateSource::Reported => assert_eq!(st.pending, None),
                        StateSource::Initial => assert!(!st.active),
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        for h in handles {
            h.await.unwrap();
        }

        assert!(!store.zone("zone2").unwrap().flag.is_active().await);
    }
}
