//! Task queue and task processor.
//!
//! The scheduler pushes [`CommandMessage`]s into a bounded FIFO; a single
//! processor drains it, dispatches each command through the actuation
//! gateway and records successful dispatches in the zone store. A full queue
//! blocks the producer instead of dropping commands.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::gateway::ActuationGateway;
use crate::mqtt::CommandMessage;
use crate::store::SharedStore;

/// Maximum number of commands buffered between scheduler and processor.
pub const TASK_QUEUE_CAPACITY: usize = 100;

pub type TaskSender = mpsc::Sender<CommandMessage>;
pub type TaskReceiver = mpsc::Receiver<CommandMessage>;

pub fn task_queue(capacity: usize) -> (TaskSender, TaskReceiver) {
    mpsc::channel(capacity)
}

pub struct TaskProcessor<G> {
    store: SharedStore,
    gateway: Arc<G>,
}

impl<G: ActuationGateway> TaskProcessor<G> {
    pub fn new(store: SharedStore, gateway: Arc<G>) -> Self {
        Self { store, gateway }
    }

    /// Process commands one at a time until `cancel` fires, then drain
    /// whatever is still buffered and return.
    pub async fn run(self, mut rx: TaskReceiver, cancel: CancellationToken) {
        info!("task processor started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(cmd) => self.process(cmd).await,
                    None => {
                        info!("task queue closed - task processor exiting");
                        return;
                    }
                },
            }
        }

        // No new sends are accepted once closed; buffered commands still
        // come out of recv() before it returns None.
        rx.close();
        let mut drained = 0usize;
        while let Some(cmd) = rx.recv().await {
            self.process(cmd).await;
            drained += 1;
        }
        info!(drained, "task processor drained queue and exited");
    }

    /// Dispatch one command. Failures are logged and the zone state is left
    /// untouched; the next sweep re-issues the command if still due.
    pub async fn process(&self, cmd: CommandMessage) {
        let payload = match cmd.to_wire() {
            Ok(p) => p,
            Err(e) => {
                error!(zone = %cmd.zone, "failed to encode command: {e}");
                return;
            }
        };

        debug!(zone = %cmd.zone, state = ?cmd.state, "sending command");

        if let Err(e) = self.gateway.send_command(&cmd, payload).await {
            error!(zone = %cmd.zone, state = ?cmd.state, "command dispatch failed: {e:#}");
            return;
        }

        match self.store.zone(&cmd.zone) {
            Some(zone) => {
                zone.flag.record_dispatch(cmd.state).await;
                info!(zone = %cmd.zone, state = ?cmd.state, "command dispatched");
            }
            None => warn!(zone = %cmd.zone, "dispatched command for unknown zone"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
