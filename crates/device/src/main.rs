mod node;
mod protocol;
mod valve;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::{env, future::Future, time::Duration};
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use node::Node;
use protocol::{COMMAND_TOPIC, STATUS_TOPIC};
use valve::ValveBoard;

const DEFAULT_ZONES: &str = "zone1,zone2,zone3,zone4";
const DEFAULT_PINS: &str = "17,27,22,23";
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let status_every_s: u64 = env::var("STATUS_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|s| *s > 0)
        .unwrap_or(30);
    let active_low = env::var("RELAY_ACTIVE_LOW")
        .map(|v| !matches!(v.as_str(), "0" | "false"))
        .unwrap_or(true);

    let zones = env::var("DEVICE_ZONES").unwrap_or_else(|_| DEFAULT_ZONES.to_string());
    let pins = env::var("ZONE_PINS").unwrap_or_else(|_| DEFAULT_PINS.to_string());
    let zone_pins = zone_pins(&zones, &pins)?;

    let mut node = Node::new(ValveBoard::new(&zone_pins, active_low)?);
    node.all_off();

    let mut options = MqttOptions::new("sprinkler-device", broker.clone(), port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    info!(%broker, port, zones = zone_pins.len(), status_every_s, "device starting");

    let mut ticker = tokio::time::interval(Duration::from_secs(status_every_s));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received");
                break;
            }
            _ = ticker.tick() => publish_status(&client, &node),
            ev = eventloop.poll() => match ev {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("device connected to mqtt");
                    if let Err(e) = client.try_subscribe(COMMAND_TOPIC, QoS::AtLeastOnce) {
                        warn!("failed to subscribe to {COMMAND_TOPIC}: {e}");
                    }
                    publish_status(&client, &node);
                }
                Ok(Event::Incoming(Packet::Publish(p))) if p.topic == COMMAND_TOPIC => {
                    if node.handle_command(&p.payload, Utc::now()) {
                        publish_status(&client, &node);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}. retrying...");
                    if !backoff(&mut shutdown, RECONNECT_DELAY).await {
                        info!("interrupt received");
                        break;
                    }
                }
            }
        }
    }

    node.all_off();
    publish_status(&client, &node);
    if let Err(e) = client.try_disconnect() {
        warn!("mqtt disconnect failed: {e}");
    }
    flush_disconnect(&mut eventloop).await;
    info!("device stopped");
    Ok(())
}

/// Wait out a reconnect delay. Returns false if `shutdown` fired first.
async fn backoff<F>(shutdown: &mut F, delay: Duration) -> bool
where
    F: Future + Unpin,
{
    tokio::select! {
        _ = shutdown => false,
        _ = sleep(delay) => true,
    }
}

/// Queue a status report. Non-blocking: the caller is the task draining the
/// request channel.
fn publish_status(client: &AsyncClient, node: &Node) {
    let payload = match serde_json::to_vec(&node.status_report()) {
        Ok(p) => p,
        Err(e) => {
            warn!("failed to encode status report: {e}");
            return;
        }
    };
    match client.try_publish(STATUS_TOPIC, QoS::AtLeastOnce, false, payload) {
        Ok(()) => debug!("status report queued"),
        Err(e) => warn!("status publish failed: {e}"),
    }
}

/// Poll until the disconnect has gone out, bounded by [`DISCONNECT_GRACE`].
async fn flush_disconnect(eventloop: &mut EventLoop) {
    let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if flushed.is_err() {
        debug!("disconnect not flushed within grace period");
    }
}

/// Pair comma-separated zone ids with GPIO pins by position.
fn zone_pins(zones: &str, pins: &str) -> Result<Vec<(String, u8)>> {
    let zones: Vec<&str> = zones
        .split(',')
        .map(str::trim)
        .filter(|z| !z.is_empty())
        .collect();
    if zones.is_empty() {
        bail!("DEVICE_ZONES lists no zones");
    }

    let pins = pins
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u8>().with_context(|| format!("invalid gpio pin '{p}'")))
        .collect::<Result<Vec<_>>>()?;
    if pins.len() < zones.len() {
        bail!("{} zones but only {} gpio pins", zones.len(), pins.len());
    }

    Ok(zones
        .into_iter()
        .zip(pins)
        .map(|(z, p)| (z.to_string(), p))
        .collect())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backoff_yields_to_shutdown() {
        let started = tokio::time::Instant::now();
        let waited = backoff(&mut std::future::ready(()), Duration::from_secs(60)).await;
        assert!(!waited);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn backoff_completes_without_shutdown() {
        let waited = backoff(&mut std::future::pending::<()>(), Duration::from_millis(10)).await;
        assert!(waited);
    }

    #[test]
    fn zone_pins_defaults_pair_up() {
        let pairs = zone_pins(DEFAULT_ZONES, DEFAULT_PINS).unwrap();
        assert_eq!(
            pairs,
            [
                ("zone1".to_string(), 17),
                ("zone2".to_string(), 27),
                ("zone3".to_string(), 22),
                ("zone4".to_string(), 23),
            ]
        );
    }

    #[test]
    fn zone_pins_trims_and_ignores_extra_pins() {
        let pairs = zone_pins(" front , back ", "5, 6, 13").unwrap();
        assert_eq!(pairs, [("front".to_string(), 5), ("back".to_string(), 6)]);
    }

    #[test]
    fn zone_pins_rejects_too_few_pins() {
        let err = zone_pins("a,b,c", "5,6").unwrap_err();
        assert!(err.to_string().contains("3 zones but only 2 gpio pins"));
    }

    #[test]
    fn zone_pins_rejects_bad_pin() {
        let err = zone_pins("a", "gpio5").unwrap_err();
        assert!(err.to_string().contains("invalid gpio pin 'gpio5'"));
    }

    #[test]
    fn zone_pins_rejects_empty_zone_list() {
        assert!(zone_pins(" , ", DEFAULT_PINS).is_err());
    }
}
