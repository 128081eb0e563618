//! Admission middleware for operations.
//!
//! Caps the number of calls executing at once. Calls beyond the limit wait in
//! FIFO order for a slot instead of being rejected; an optional bound turns an
//! over-long wait into `OperationError::AdmissionTimeout`.
//!
//! Once admitted, a call runs against its own deadline
//! (`ctx.call_timeout_ms`). Time spent queued does not count.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// AdmissionController
// ---------------------------------------------------------------------------

/// Shared admission state: a fair semaphore plus wait bookkeeping.
#[derive(Debug)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    limit: usize,
    timeout: Option<Duration>,
    waiting: AtomicUsize,
}

impl AdmissionController {
    /// `limit` is clamped to at least one slot.
    #[must_use]
    pub fn new(limit: u32, timeout: Option<Duration>) -> Self {
        let limit = (limit as usize).max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            timeout,
            waiting: AtomicUsize::new(0),
        }
    }

    /// Waits for a slot. The returned lease frees it on drop.
    ///
    /// # Errors
    ///
    /// `AdmissionTimeout` if no slot frees up within the configured bound,
    /// `ShuttingDown` if the controller was closed.
    pub async fn admit(self: &Arc<Self>, call_id: u64) -> Result<AdmissionLease, OperationError> {
        let _waiter = WaitGuard::enter(self);

        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        let permit = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, acquire).await {
                Ok(permit) => permit,
                Err(_elapsed) => {
                    #[allow(clippy::cast_possible_truncation)]
                    let waited_ms = limit.as_millis() as u64;
                    debug!(call_id, waited_ms, "admission timed out");
                    return Err(OperationError::AdmissionTimeout { waited_ms });
                }
            },
            None => acquire.await,
        }
        .map_err(|_closed| OperationError::ShuttingDown)?;

        Ok(AdmissionLease {
            _permit: permit,
            call_id,
        })
    }

    /// Free slots right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Calls currently holding a slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.limit.saturating_sub(self.available())
    }

    /// Calls currently queued for a slot.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    /// Stops admitting. Queued and future callers fail with `ShuttingDown`;
    /// leases already granted stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Keeps the `waiting` count and gauge honest on every exit from `admit`,
/// including cancellation.
struct WaitGuard<'a> {
    controller: &'a AdmissionController,
}

impl<'a> WaitGuard<'a> {
    fn enter(controller: &'a AdmissionController) -> Self {
        let now = controller.waiting.fetch_add(1, Ordering::AcqRel) + 1;
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("reel_admission_waiting").set(now as f64);
        Self { controller }
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let now = self.controller.waiting.fetch_sub(1, Ordering::AcqRel) - 1;
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("reel_admission_waiting").set(now as f64);
    }
}

/// An admission slot. Dropping it lets the next queued call in.
#[derive(Debug)]
pub struct AdmissionLease {
    _permit: OwnedSemaphorePermit,
    call_id: u64,
}

impl AdmissionLease {
    #[must_use]
    pub fn call_id(&self) -> u64 {
        self.call_id
    }
}

// ---------------------------------------------------------------------------
// AdmissionLayer
// ---------------------------------------------------------------------------

/// Tower layer that holds an admission lease for the whole downstream call
/// and enforces the call deadline from the moment the lease is granted.
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    controller: Arc<AdmissionController>,
}

impl AdmissionLayer {
    #[must_use]
    pub fn new(controller: Arc<AdmissionController>) -> Self {
        Self { controller }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            controller: Arc::clone(&self.controller),
        }
    }
}

// ---------------------------------------------------------------------------
// AdmissionService
// ---------------------------------------------------------------------------

/// Service wrapper that queues calls until a slot is free, then runs them
/// under their deadline.
#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    controller: Arc<AdmissionController>,
}

impl<S> Service<Operation> for AdmissionService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        // The readied service goes with this call; a fresh clone stays behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let controller = Arc::clone(&self.controller);

        Box::pin(async move {
            let call_id = op.ctx().call_id;
            let operation = op.ctx().operation;
            let deadline_ms = op.ctx().call_timeout_ms;

            let lease = controller.admit(call_id).await?;
            let result = tokio::time::timeout(Duration::from_millis(deadline_ms), inner.call(op))
                .await
                .unwrap_or_else(|_elapsed| {
                    warn!(operation, call_id, deadline_ms, "call deadline exceeded");
                    Err(OperationError::Timeout {
                        timeout_ms: deadline_ms,
                    })
                });
            drop(lease);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
