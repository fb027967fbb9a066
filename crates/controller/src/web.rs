use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use serde_json::json;
use std::env;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::store::{SharedStore, ZoneSnapshot};

/// Grace period for in-flight requests once shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// JSON response
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub microcontroller_status: &'static str,
    pub sprinkler_status: Vec<ZoneSnapshot>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/system-status", get(system_status))
        .with_state(store)
}

async fn ping() -> impl IntoResponse {
    Json(json!({ "ping": "OK" }))
}

async fn system_status(State(store): State<SharedStore>) -> impl IntoResponse {
    let microcontroller_status = if store.is_connected() {
        "OKAY"
    } else {
        "DISCONNECTED"
    };
    Json(StatusResponse {
        microcontroller_status,
        sprinkler_status: store.snapshot().await,
    })
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

/// Serve the reporting API until `shutdown` fires. Shutdown is independent
/// of the controller service and bounded by [`SHUTDOWN_GRACE`].
pub async fn serve(store: SharedStore, shutdown: CancellationToken) {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, "failed to bind web port: {e}");
            return;
        }
    };

    info!("status api listening on http://{addr}");

    let signal = shutdown.clone();
    let server = axum::serve(listener, router(store))
        .with_graceful_shutdown(async move { signal.cancelled().await })
        .into_future();

    tokio::select! {
        res = server => {
            if let Err(e) = res {
                error!("web server error: {e}");
            }
        }
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            warn!("web server did not shut down within grace period");
        }
    }

    info!("status api stopped");
}

// ===========================================================================
// Tests
// ===========================================================================
