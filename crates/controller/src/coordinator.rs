//! Controller service: wires the scheduler loop, task queue and task
//! processor together and tears them down in a fixed order when the
//! top-level shutdown token fires:
//!
//! 1. the scheduler stops launching sweeps,
//! 2. the task processor is cancelled and drains the queue,
//! 3. the transport unsubscribes and disconnects,
//! 4. `run` returns, which is the supervisor's completion signal.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::gateway::ActuationGateway;
use crate::processor::{task_queue, TaskProcessor, TASK_QUEUE_CAPACITY};
use crate::scheduler;
use crate::store::SharedStore;
use crate::transport::Transport;

pub struct ControllerService<G, T> {
    store: SharedStore,
    gateway: Arc<G>,
    transport: T,
    sweep_interval: Duration,
}

impl<G, T> ControllerService<G, T>
where
    G: ActuationGateway,
    T: Transport,
{
    pub fn new(store: SharedStore, gateway: G, transport: T) -> Self {
        Self {
            store,
            gateway: Arc::new(gateway),
            transport,
            sweep_interval: scheduler::SWEEP_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Run until `shutdown` fires, then shut down in order.
    pub async fn run(self, shutdown: CancellationToken) {
        let (tx, rx) = task_queue(TASK_QUEUE_CAPACITY);

        // Deliberately not a child of `shutdown`: the processor must keep
        // running until the scheduler has stopped producing.
        let processor_cancel = CancellationToken::new();
        let processor = TaskProcessor::new(Arc::clone(&self.store), Arc::clone(&self.gateway));
        let processor_handle = tokio::spawn(processor.run(rx, processor_cancel.clone()));

        scheduler::run(Arc::clone(&self.store), tx, self.sweep_interval, shutdown).await;

        info!("controller shutting down - stopping task processor");
        processor_cancel.cancel();
        if let Err(e) = processor_handle.await {
            error!("task processor panicked: {e}");
        }

        self.transport.close().await;
        info!("controller service stopped");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::mqtt::DesiredState;
    use crate::processor::tests::RecordingGateway;
    use crate::store::ZoneStore;
    use std::sync::Mutex;

    /// Records the moment it was closed relative to gateway activity.
    struct RecordingTransport {
        log: Arc<Mutex<Vec<String>>>,
        gateway: Arc<RecordingGateway>,
    }

    impl Transport for RecordingTransport {
        async fn close(self) {
            let sent = self.gateway.zones().len();
            self.log.lock().unwrap().push(format!("closed after {sent} sends"));
        }
    }

    /// Gateway wrapper so the test can keep a handle on what was sent.
    struct SharedGateway(Arc<RecordingGateway>);

    impl ActuationGateway for SharedGateway {
        async fn send_command(
            &self,
            cmd: &crate::mqtt::CommandMessage,
            payload: Vec<u8>,
        ) -> anyhow::Result<()> {
            self.0.send_command(cmd, payload).await
        }
    }

    fn all_day_store() -> SharedStore {
        let cfg = config::parse(
            r#"{
                "appConfig": {"mqttBroker": "localhost", "mqttPort": 1883},
                "zoneList": {
                    "zone1": {"schedule": [{"startTime": "00:00:00", "durationMinutes": 1440, "weekdays": 127}]}
                }
            }"#,
        )
        .unwrap();
        Arc::new(ZoneStore::from_config(&cfg))
    }

    #[tokio::test]
    async fn sweep_dispatch_and_ordered_shutdown() {
        let store = all_day_store();
        let recorder = Arc::new(RecordingGateway::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport {
            log: Arc::clone(&log),
            gateway: Arc::clone(&recorder),
        };

        let shutdown = CancellationToken::new();
        let service = ControllerService::new(
            Arc::clone(&store),
            SharedGateway(Arc::clone(&recorder)),
            transport,
        )
        .with_sweep_interval(Duration::from_millis(10));
        let handle = tokio::spawn(service.run(shutdown.clone()));

        // Wait until the first start has been dispatched and recorded.
        tokio::time::timeout(Duration::from_secs(2), async {
            while !store.zone("zone1").unwrap().flag.is_active().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("zone1 should be started");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("service should stop promptly")
            .unwrap();

        let sent = recorder.sent.lock().unwrap().clone();
        assert!(!sent.is_empty());
        assert!(sent.iter().all(|c| c.zone == "zone1" && c.state == DesiredState::On));

        // Transport closed exactly once, after every dispatch.
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], format!("closed after {} sends", sent.len()));
    }

    /// Broker unreachable, the client's request queue full, and a zone that
    /// keeps asking to stop: shutdown must still finish promptly.
    #[tokio::test]
    async fn shutdown_is_bounded_during_broker_outage() {
        use crate::gateway::MqttGateway;
        use crate::mqtt::ZoneReport;
        use crate::transport::MqttTransport;
        use rumqttc::QoS;

        // Window 00:00-00:01; outside it an active zone is always due a stop.
        let cfg = config::parse(
            r#"{
                "appConfig": {"mqttBroker": "127.0.0.1", "mqttPort": 1},
                "zoneList": {
                    "zone1": {"schedule": [{"startTime": "00:00:00", "durationMinutes": 1, "weekdays": 127}]}
                }
            }"#,
        )
        .unwrap();
        let store: SharedStore = Arc::new(ZoneStore::from_config(&cfg));
        store
            .zone("zone1")
            .unwrap()
            .flag
            .record_report(&ZoneReport {
                active: true,
                last_on: None,
            })
            .await;

        let transport = MqttTransport::connect("127.0.0.1", 1, Arc::clone(&store));
        let client = transport.client();
        while client
            .try_publish("fill", QoS::AtLeastOnce, false, vec![0u8])
            .is_ok()
        {}

        let shutdown = CancellationToken::new();
        let service = ControllerService::new(Arc::clone(&store), MqttGateway::new(client), transport)
            .with_sweep_interval(Duration::from_millis(5));
        let handle = tokio::spawn(service.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("controller should stop despite the outage")
            .unwrap();

        // Every dispatch failed, so the reported state is untouched.
        let st = store.zone("zone1").unwrap().flag.snapshot().await;
        assert!(st.active);
        assert_eq!(st.pending, None);
    }

    #[tokio::test]
    async fn shutdown_before_first_sweep_still_closes_transport() {
        let store = all_day_store();
        let recorder = Arc::new(RecordingGateway::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport {
            log: Arc::clone(&log),
            gateway: Arc::clone(&recorder),
        };

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        ControllerService::new(store, SharedGateway(Arc::clone(&recorder)), transport)
            .run(shutdown)
            .await;

        assert!(recorder.zones().is_empty());
        assert_eq!(*log.lock().unwrap(), ["closed after 0 sends"]);
    }
}
