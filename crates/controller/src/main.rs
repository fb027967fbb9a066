mod config;
mod coordinator;
mod gateway;
mod listener;
mod mqtt;
mod processor;
mod schedule;
mod scheduler;
mod store;
mod transport;
mod web;

use anyhow::Result;
use std::{env, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use coordinator::ControllerService;
use gateway::{ActuationGateway, DryRunGateway, MqttGateway};
use store::{SharedStore, ZoneStore};
use transport::MqttTransport;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
    let cfg = config::load(&config_path)?;

    // ── Logging ─────────────────────────────────────────────────────
    // RUST_LOG wins over the config's debugLevel when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.app_config.log_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    cfg.log_summary();

    info!(
        config = %config_path,
        api_url = %cfg.app_config.api_url,
        broker = %cfg.app_config.mqtt_broker,
        port = cfg.app_config.mqtt_port,
        dry_run = cfg.app_config.dry_run,
        "controller starting"
    );

    // ── Shared state ────────────────────────────────────────────────
    let store: SharedStore = Arc::new(ZoneStore::from_config(&cfg));
    if store.zone_count() == 0 {
        warn!("no zones configured - the scheduler will idle");
    }

    // ── Shutdown signal ─────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    // ── Web server ──────────────────────────────────────────────────
    let web = tokio::spawn(web::serve(Arc::clone(&store), shutdown.clone()));

    // ── Transport + gateway ─────────────────────────────────────────
    let transport = MqttTransport::connect(
        &cfg.app_config.mqtt_broker,
        cfg.app_config.mqtt_port,
        Arc::clone(&store),
    );

    if cfg.app_config.dry_run {
        run_controller(&cfg, store, DryRunGateway, transport, shutdown).await;
    } else {
        let gateway = MqttGateway::new(transport.client());
        run_controller(&cfg, store, gateway, transport, shutdown).await;
    }

    if let Err(e) = web.await {
        warn!("web task panicked: {e}");
    }
    info!("exiting");
    Ok(())
}

async fn run_controller<G: ActuationGateway>(
    cfg: &Config,
    store: SharedStore,
    gateway: G,
    transport: MqttTransport,
    shutdown: CancellationToken,
) {
    info!(
        zones = store.zone_count(),
        mode = if cfg.app_config.dry_run { "dry-run" } else { "live" },
        "controller service starting"
    );
    ControllerService::new(store, gateway, transport)
        .run(shutdown)
        .await;
}

/// Cancel `shutdown` on ctrl-c or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("interrupt received"),
                    _ = term.recv() => info!("SIGTERM received"),
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                info!("interrupt received");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received");
    }

    info!("cancelling shutdown token");
    shutdown.cancel();
}
