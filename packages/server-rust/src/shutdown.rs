//! Graceful shutdown: a call gate with in-flight tracking.
//!
//! The lifecycle state lives in an `ArcSwap` so the hot path reads it without
//! locking. Every admitted call holds an [`InFlightGuard`]; draining waits
//! until the last guard is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Server lifecycle state.
///
/// State machine: Starting -> Serving -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Built but not yet accepting calls.
    Starting,
    /// Accepting calls.
    Serving,
    /// Rejecting new calls, waiting for in-flight ones.
    Draining,
    /// Every in-flight call has finished.
    Stopped,
}

/// Gates new calls and tracks the ones already running.
#[derive(Debug)]
pub struct ShutdownController {
    state: ArcSwap<LifecycleState>,
    in_flight: Arc<InFlight>,
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    drained: Notify,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(LifecycleState::Starting),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn set_serving(&self) {
        self.state.store(Arc::new(LifecycleState::Serving));
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Registers a new call. Returns `None` unless the server is serving.
    #[must_use]
    pub fn try_enter(&self) -> Option<InFlightGuard> {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        };
        // Checked after counting, so a concurrent drain either sees this call
        // or this call sees the drain.
        if self.state() == LifecycleState::Serving {
            Some(guard)
        } else {
            None
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Stops accepting calls.
    pub fn begin_shutdown(&self) {
        self.state.store(Arc::new(LifecycleState::Draining));
        info!(in_flight = self.in_flight(), "shutdown started");
    }

    /// Waits up to `timeout` for in-flight calls to finish. Returns `true`
    /// and moves to `Stopped` once drained; on timeout stays `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.in_flight.drained.notified();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok();

        if drained {
            self.state.store(Arc::new(LifecycleState::Stopped));
        } else {
            warn!(in_flight = self.in_flight(), "drain timed out");
        }
        drained
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one call as in flight until dropped, including on panic.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.drained.notify_waiters();
        }
    }
}
