//! Scheduler loop: sweeps every zone's schedule on a fixed cadence and
//! enqueues start/stop commands for the task processor.
//!
//! The loop only decides; it never touches the actuator or writes zone
//! state. Each item is evaluated against the zone's active flag under a
//! short read lock, and any due transition is pushed onto the bounded task
//! queue (blocking when the queue is full).
//!
//! ```text
//! Running ──[sweep]──▶ Running ──[cancel]──▶ ShuttingDown ──▶ Stopped
//! ```

use chrono::{DateTime, Local, TimeZone};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::mqtt::{CommandMessage, DesiredState};
use crate::processor::TaskSender;
use crate::schedule::{self, Transition};
use crate::store::{SharedStore, ZoneStore};

/// Pause between two full sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed { enqueued: usize },
    /// Shutdown was signalled while waiting on a full queue.
    Cancelled,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run sweeps until `cancel` fires. The inter-sweep wait is interruptible,
/// so shutdown latency is bounded by `interval`.
pub async fn run(
    store: SharedStore,
    tx: TaskSender,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(
        zones = store.zone_count(),
        interval_sec = interval.as_secs(),
        "scheduler started"
    );

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let now = Local::now();
        if sweep(&store, &tx, &now, &cancel).await == SweepOutcome::Cancelled {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("shutdown signalled during scheduler wait");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("scheduler stopped producing sweeps");
}

// ---------------------------------------------------------------------------
// One sweep
// ---------------------------------------------------------------------------

/// Evaluate every schedule item of every zone at `now`, enqueueing a command
/// for each due transition. Items within a zone are visited in declaration
/// order. A malformed start time skips that item for this sweep only.
pub async fn sweep<Tz>(
    store: &ZoneStore,
    tx: &TaskSender,
    now: &DateTime<Tz>,
    cancel: &CancellationToken,
) -> SweepOutcome
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let mut enqueued = 0;

    for zone in store.zones() {
        debug!(zone = %zone.id, "checking zone schedule");

        for (idx, item) in zone.schedule.iter().enumerate() {
            let state = zone.flag.snapshot().await;

            let transition = match schedule::evaluate(item, state.active, now) {
                Ok(Some(t)) => t,
                Ok(None) => continue,
                Err(e) => {
                    error!(zone = %zone.id, index = idx, "skipping schedule item: {e}");
                    continue;
                }
            };

            // A delivered stop stays pending until the device reports; the
            // report either confirms it or re-arms the stop.
            if transition == Transition::Stop && state.pending == Some(DesiredState::Off) {
                debug!(zone = %zone.id, index = idx, "stop already dispatched - awaiting report");
                continue;
            }

            info!(
                zone = %zone.id,
                index = idx,
                now = %now.to_rfc3339(),
                start_time = %item.start_time,
                duration_min = item.duration_minutes,
                "{}",
                match transition {
                    Transition::Start => "starting watering",
                    Transition::Stop => "stopping watering",
                }
            );

            let cmd = CommandMessage::update_zone_state(zone.id.clone(), transition.desired_state());
            tokio::select! {
                res = tx.send(cmd) => {
                    if res.is_err() {
                        error!(zone = %zone.id, "task queue closed - command not enqueued");
                        return SweepOutcome::Cancelled;
                    }
                    enqueued += 1;
                }
                _ = cancel.cancelled() => {
                    info!(zone = %zone.id, "shutdown while task queue full - command not enqueued");
                    return SweepOutcome::Cancelled;
                }
            }
        }
    }

    SweepOutcome::Completed { enqueued }
}

// ===========================================================================
// Tests
// ===========================================================================
