//! Periodic cleanup of transactions and abandoned sessions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::worker::BackgroundRunnable;
use crate::duplex::SessionRegistry;
use crate::transaction::TransactionCoordinator;

/// What one sweep cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Active transactions aborted for outliving their timeout.
    pub expired: usize,
    /// Terminal transactions forgotten after the retention window.
    pub purged: usize,
    /// Sessions removed because their listener was gone.
    pub reaped: usize,
}

impl SweepReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expired == 0 && self.purged == 0 && self.reaped == 0
    }
}

/// On-demand requests for the reaper.
#[derive(Debug)]
pub enum ReaperTask {
    /// Sweep now and report the result.
    SweepNow(oneshot::Sender<SweepReport>),
}

/// Runnable that expires transactions, purges finished ones and reaps
/// disconnected sessions on every tick.
pub struct TransactionReaper {
    coordinator: Arc<TransactionCoordinator>,
    sessions: Arc<SessionRegistry>,
    retention: Duration,
}

impl TransactionReaper {
    #[must_use]
    pub fn new(
        coordinator: Arc<TransactionCoordinator>,
        sessions: Arc<SessionRegistry>,
        retention: Duration,
    ) -> Self {
        Self {
            coordinator,
            sessions,
            retention,
        }
    }

    /// Runs one full sweep.
    pub fn sweep(&self) -> SweepReport {
        let report = SweepReport {
            expired: self.coordinator.expire(),
            purged: self.coordinator.purge_terminal(self.retention),
            reaped: self.sessions.reap_disconnected(),
        };
        if !report.is_empty() {
            debug!(
                expired = report.expired,
                purged = report.purged,
                reaped = report.reaped,
                "reaper sweep"
            );
        }
        report
    }
}

#[async_trait]
impl BackgroundRunnable for TransactionReaper {
    type Task = ReaperTask;

    async fn run(&mut self, task: ReaperTask) {
        match task {
            ReaperTask::SweepNow(reply) => {
                let _ = reply.send(self.sweep());
            }
        }
    }

    async fn on_tick(&mut self) {
        self.sweep();
    }

    async fn shutdown(&mut self) {
        info!("transaction reaper stopped");
    }
}
