//! Actuation gateways: deliver an encoded zone command to the physical
//! controller. `MqttGateway` publishes on the command topic; `DryRunGateway`
//! only logs. Selected once at startup from `appConfig.dryRun`.

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, QoS};
use std::future::Future;
use tracing::info;

use crate::mqtt::{CommandMessage, COMMAND_TOPIC};

pub trait ActuationGateway: Send + Sync + 'static {
    /// Deliver `payload` (the wire encoding of `cmd`). `Ok` means the command
    /// was accepted for delivery.
    fn send_command(
        &self,
        cmd: &CommandMessage,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;
}

// ---------------------------------------------------------------------------
// Live gateway (publishes over MQTT)
// ---------------------------------------------------------------------------

pub struct MqttGateway {
    client: AsyncClient,
}

impl MqttGateway {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

impl ActuationGateway for MqttGateway {
    /// Never waits on the client's request queue. While the broker is
    /// unreachable the event loop stops draining it, so a full queue is a
    /// dispatch failure and the next sweep retries.
    async fn send_command(&self, cmd: &CommandMessage, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(COMMAND_TOPIC, QoS::AtLeastOnce, false, payload)
            .with_context(|| format!("failed to publish command for zone '{}'", cmd.zone))
    }
}

// ---------------------------------------------------------------------------
// Dry-run gateway (no actuation)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct DryRunGateway;

impl ActuationGateway for DryRunGateway {
    async fn send_command(&self, cmd: &CommandMessage, payload: Vec<u8>) -> Result<()> {
        info!(
            zone = %cmd.zone,
            state = ?cmd.state,
            payload = %String::from_utf8_lossy(&payload),
            "[dry-run] command not sent"
        );
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::DesiredState;

    #[tokio::test]
    async fn dry_run_always_succeeds() {
        let cmd = CommandMessage::update_zone_state("zone1", DesiredState::On);
        let payload = cmd.to_wire().unwrap();
        DryRunGateway.send_command(&cmd, payload).await.unwrap();
    }

    /// The client only queues requests for its event loop; with the loop
    /// alive but never polled, a publish is accepted.
    #[tokio::test]
    async fn mqtt_gateway_accepts_publish_while_event_loop_alive() {
        let opts = rumqttc::MqttOptions::new("test-gateway", "127.0.0.1", 1883);
        let (client, _el) = AsyncClient::new(opts, 10);
        let gw = MqttGateway::new(client);

        let cmd = CommandMessage::update_zone_state("zone1", DesiredState::Off);
        gw.send_command(&cmd, cmd.to_wire().unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn mqtt_gateway_fails_fast_when_request_queue_full() {
        let opts = rumqttc::MqttOptions::new("test-gateway-full", "127.0.0.1", 1);
        let (client, _el) = AsyncClient::new(opts, 1);
        let gw = MqttGateway::new(client);

        let cmd = CommandMessage::update_zone_state("zone2", DesiredState::Off);
        gw.send_command(&cmd, cmd.to_wire().unwrap()).await.unwrap();

        // Queue of one is now full and nothing polls it.
        let res = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            gw.send_command(&cmd, cmd.to_wire().unwrap()),
        )
        .await
        .expect("send_command must not wait on a full queue");
        let err = res.unwrap_err();
        assert!(format!("{err:#}").contains("zone2"));
    }

    #[tokio::test]
    async fn mqtt_gateway_fails_when_event_loop_gone() {
        let opts = rumqttc::MqttOptions::new("test-gateway-dead", "127.0.0.1", 1883);
        let (client, el) = AsyncClient::new(opts, 10);
        drop(el);
        let gw = MqttGateway::new(client);

        let cmd = CommandMessage::update_zone_state("zone1", DesiredState::On);
        let err = gw.send_command(&cmd, cmd.to_wire().unwrap()).await.unwrap_err();
        assert!(format!("{err:#}").contains("zone1"));
    }
}
