//! MQTT transport: owns the rumqttc client and its event loop task.
//!
//! The event loop (re)subscribes to the status topic on every connect and
//! hands status payloads to the status listener. Connection loss is logged
//! and retried; the controller keeps running in a degraded state.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::listener;
use crate::mqtt::STATUS_TOPIC;
use crate::store::{SharedStore, ZoneStore};

const CLIENT_ID: &str = "sprinkler-controller";
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// How long `close` waits for the disconnect to be flushed.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Connection-level teardown run by the coordinator after the task
/// processor has exited.
pub trait Transport: Send + 'static {
    /// Unsubscribe and disconnect.
    fn close(self) -> impl Future<Output = ()> + Send;
}

pub struct MqttTransport {
    client: AsyncClient,
    event_loop: JoinHandle<()>,
    stop: CancellationToken,
}

impl MqttTransport {
    /// Create the client and spawn its event loop. Connection happens in the
    /// background; failures surface as logged reconnect attempts.
    pub fn connect(broker: &str, port: u16, store: SharedStore) -> Self {
        let mut options = MqttOptions::new(CLIENT_ID, broker, port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, eventloop) = AsyncClient::new(options, 20);
        let stop = CancellationToken::new();
        let event_loop = tokio::spawn(drive(eventloop, client.clone(), store, stop.clone()));

        info!(broker, port, "mqtt transport started");
        Self {
            client,
            event_loop,
            stop,
        }
    }

    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }
}

impl Transport for MqttTransport {
    async fn close(mut self) {
        info!("mqtt cleanup");

        // Non-blocking: during an outage the request queue may be full and
        // nothing drains it.
        if let Err(e) = self.client.try_unsubscribe(STATUS_TOPIC) {
            warn!("mqtt unsubscribe failed: {e}");
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!("mqtt disconnect failed: {e}");
        }

        if tokio::time::timeout(DISCONNECT_GRACE, &mut self.event_loop)
            .await
            .is_err()
        {
            debug!("mqtt event loop did not flush disconnect in time - stopping it");
            self.stop.cancel();
            let _ = self.event_loop.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// What the event loop does after handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    store: SharedStore,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            ev = eventloop.poll() => ev,
        };

        match event {
            Ok(event) => {
                if handle_event(event, &client, &store).await == Flow::Stop {
                    break;
                }
            }
            Err(e) => {
                store.set_connected(false);
                warn!("mqtt connection lost: {e}. reconnecting...");
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }

    debug!("mqtt event loop exited");
}

async fn handle_event(event: Event, client: &AsyncClient, store: &ZoneStore) -> Flow {
    match event {
        Event::Incoming(Packet::Publish(p)) => {
            if p.topic == STATUS_TOPIC {
                listener::handle_status(store, &p.payload).await;
            } else {
                debug!(topic = %p.topic, "unhandled topic");
            }
        }
        Event::Incoming(Packet::ConnAck(_)) => {
            info!("mqtt connected");
            store.set_connected(true);
            // Non-blocking: the caller is the task draining the request
            // channel.
            if let Err(e) = client.try_subscribe(STATUS_TOPIC, QoS::AtLeastOnce) {
                warn!("failed to subscribe to {STATUS_TOPIC}: {e}");
            } else {
                info!(topic = STATUS_TOPIC, "subscribed");
            }
        }
        Event::Incoming(Packet::Disconnect) => {
            warn!("mqtt disconnected by broker");
            store.set_connected(false);
        }
        Event::Outgoing(Outgoing::Disconnect) => {
            info!("mqtt disconnect sent");
            store.set_connected(false);
            return Flow::Stop;
        }
        _ => {}
    }
    Flow::Continue
}

// ===========================================================================
// Tests
// ===========================================================================
