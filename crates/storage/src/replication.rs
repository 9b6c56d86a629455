//! Pull-based replication between a primary and a replica
//!
//! Each step reads the replica's applied change number, loads the next batch
//! from the primary and hands it to the replica. Failed steps are logged and
//! retried on the next tick; the store itself never retries.

use std::sync::Arc;
use std::time::Duration;
use strand_core::{ChangeApplier, ChangePropagator, Error, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of a single replication step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationProgress {
    /// Records applied by this step
    pub applied: usize,
    /// Replica's applied change number after the step
    pub last_applied: u64,
    /// Whether the primary had nothing beyond this batch
    pub caught_up: bool,
}

#[derive(Clone)]
pub struct ReplicationLoop {
    propagator: Arc<dyn ChangePropagator>,
    applier: Arc<dyn ChangeApplier>,
    batch_size: usize,
    poll_interval: Duration,
}

impl ReplicationLoop {
    pub fn new(propagator: Arc<dyn ChangePropagator>, applier: Arc<dyn ChangeApplier>) -> Self {
        Self {
            propagator,
            applier,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Move at most one batch from the primary to the replica
    pub fn replicate_once(&self) -> Result<ReplicationProgress> {
        let from = self.applier.get_latest_applied_change_number()?;
        let changes = self.propagator.load_changes(from, self.batch_size)?;
        if changes.is_empty() {
            return Ok(ReplicationProgress {
                applied: 0,
                last_applied: from,
                caught_up: true,
            });
        }

        let outcome = self.applier.save_changes(&changes);
        let last_applied = outcome.last_applied;
        if let Some(error) = outcome.error {
            tracing::warn!(from, last_applied, error = %error, "Replica stopped mid-batch");
            return Err(error);
        }

        let applied = changes
            .iter()
            .filter(|c| c.change_number > from && c.change_number <= last_applied)
            .count();
        Ok(ReplicationProgress {
            applied,
            last_applied,
            caught_up: changes.len() < self.batch_size,
        })
    }

    /// Replicate until `shutdown` turns true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Replication loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let step = self.clone();
            let caught_up = match tokio::task::spawn_blocking(move || step.replicate_once()).await {
                Ok(Ok(progress)) => {
                    if progress.applied > 0 {
                        tracing::debug!(
                            applied = progress.applied,
                            last_applied = progress.last_applied,
                            "Replicated changes"
                        );
                    }
                    progress.caught_up
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Replication step failed");
                    true
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Replication step panicked");
                    true
                }
            };

            // A full batch means more is waiting
            if !caught_up {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Replication loop stopped");
    }

    /// Run on the current tokio runtime
    pub fn spawn(self) -> ReplicationHandle {
        let (shutdown, receiver) = watch::channel(false);
        let join = tokio::spawn(self.run(receiver));
        ReplicationHandle { shutdown, join }
    }
}

impl std::fmt::Debug for ReplicationLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationLoop")
            .field("batch_size", &self.batch_size)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// Handle to a spawned [`ReplicationLoop`]
pub struct ReplicationHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReplicationHandle {
    /// Signal the loop to stop and wait for it
    pub async fn shutdown(self) -> Result<()> {
        if self.shutdown.send(true).is_err() {
            tracing::debug!("Replication loop already finished");
        }
        self.join
            .await
            .map_err(|e| Error::storage_with_source("stop replication", "loop task failed", e))
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
