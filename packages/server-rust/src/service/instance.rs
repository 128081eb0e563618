//! Instance-per-call service execution.
//!
//! Every admitted call gets a fresh [`ServiceInstance`] from the
//! [`InstanceFactory`]. The instance owns the call's state and is consumed by
//! [`ServiceInstance::execute`], so nothing set during one call is ever seen
//! by another. Shared collaborators reach the instance through
//! [`ServiceDeps`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::FutureExt;
use reel_core::{FaultPayload, SearchHit, TitleGraph, TransactionId};
use tower::Service;
use tracing::{debug, warn};
use uuid::Uuid;

use super::catalog::Catalog;
use super::config::ServerConfig;
use super::operation::{CallContext, Operation, OperationError, OperationResponse};
use crate::duplex::{ChannelError, SessionHandle, SessionRegistry};
use crate::transaction::{PersonRecord, TransactionCoordinator};

/// Collaborators shared by every service instance.
#[derive(Debug)]
pub struct ServiceDeps {
    pub catalog: Catalog,
    pub coordinator: Arc<TransactionCoordinator>,
    pub sessions: Arc<SessionRegistry>,
    pub config: Arc<ServerConfig>,
}

// ---------------------------------------------------------------------------
// InstanceFactory
// ---------------------------------------------------------------------------

/// Creates one [`ServiceInstance`] per call.
#[derive(Debug, Clone)]
pub struct InstanceFactory {
    deps: Arc<ServiceDeps>,
    next_instance: Arc<AtomicU64>,
}

impl InstanceFactory {
    #[must_use]
    pub fn new(deps: Arc<ServiceDeps>) -> Self {
        Self {
            deps,
            next_instance: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Builds a fresh instance with empty state.
    #[must_use]
    pub fn create(&self) -> ServiceInstance {
        let id = self.next_instance.fetch_add(1, Ordering::Relaxed);
        debug!(instance = id, "instance created");
        ServiceInstance {
            id,
            state: None,
            deps: Arc::clone(&self.deps),
        }
    }

    /// Number of instances created so far.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.next_instance.load(Ordering::Relaxed) - 1
    }
}

// ---------------------------------------------------------------------------
// ServiceInstance
// ---------------------------------------------------------------------------

/// One call's worth of service state.
#[derive(Debug)]
pub struct ServiceInstance {
    id: u64,
    state: Option<Uuid>,
    deps: Arc<ServiceDeps>,
}

impl ServiceInstance {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Runs `op` and disposes of the instance.
    ///
    /// # Errors
    ///
    /// `throwFault` always fails with a business fault. `search` fails when
    /// the caller's session is unknown or its listener is gone. The
    /// transaction operations fail when no active transaction flowed with
    /// the call.
    pub async fn execute(mut self, op: Operation) -> Result<OperationResponse, OperationError> {
        match op {
            Operation::Top10 { .. } => Ok(OperationResponse::Titles(self.top10())),
            Operation::SetState { value, .. } => {
                self.set_state(value);
                Ok(OperationResponse::Ack)
            }
            Operation::GetData { .. } => Ok(OperationResponse::Data(self.get_data())),
            Operation::Slow { .. } => {
                self.slow().await;
                Ok(OperationResponse::Ack)
            }
            Operation::ThrowFault { .. } => Err(self.throw_fault()),
            Operation::Search { ctx } => {
                self.search(&ctx)?;
                Ok(OperationResponse::Ack)
            }
            Operation::BeginTransaction { ctx, value } => {
                self.begin_transaction(&ctx, value)?;
                Ok(OperationResponse::Ack)
            }
            Operation::CompleteTransaction { ctx } => {
                self.complete_transaction(&ctx)?;
                Ok(OperationResponse::Ack)
            }
        }
    }

    #[must_use]
    pub fn top10(&self) -> TitleGraph {
        self.deps.catalog.top10()
    }

    pub fn set_state(&mut self, value: Uuid) {
        self.state = Some(value);
    }

    /// The value stored by `set_state` on this instance, or nil.
    #[must_use]
    pub fn get_data(&self) -> Uuid {
        self.state.unwrap_or_else(Uuid::nil)
    }

    pub async fn slow(&self) {
        tokio::time::sleep(Duration::from_millis(self.deps.config.slow_duration_ms)).await;
    }

    #[must_use]
    pub fn throw_fault(&self) -> OperationError {
        OperationError::Fault(FaultPayload::business("the service raised a fault on request"))
    }

    /// Starts streaming search results to the caller's session and returns
    /// without waiting for them.
    ///
    /// # Errors
    ///
    /// `UnknownSession` if the session is not registered, `Channel(Gone)` if
    /// its listener has already been closed.
    pub fn search(&self, ctx: &CallContext) -> Result<(), OperationError> {
        let session = self
            .deps
            .sessions
            .get(ctx.session_id)
            .ok_or(OperationError::UnknownSession(ctx.session_id))?;
        if !session.is_connected() {
            return Err(ChannelError::Gone.into());
        }

        let hits = self.deps.catalog.search_hits();
        let interval = Duration::from_millis(self.deps.config.search_push_interval_ms);
        let producer = tokio::spawn(stream_results(
            Arc::clone(&session),
            hits,
            interval,
            ctx.call_id,
        ));
        session.track_producer(producer.abort_handle());
        Ok(())
    }

    /// Writes a provisional person row under the caller's transaction.
    ///
    /// # Errors
    ///
    /// `TransactionRequired` without a flowed transaction, `Transaction`
    /// if the context is unknown or no longer active.
    pub fn begin_transaction(&self, ctx: &CallContext, value: Uuid) -> Result<(), OperationError> {
        let txn = require_transaction(ctx)?;
        self.deps
            .coordinator
            .enlist(txn, PersonRecord::new(value.to_string()))?;
        Ok(())
    }

    /// Votes the caller's transaction ready to commit.
    ///
    /// # Errors
    ///
    /// Same as [`begin_transaction`](Self::begin_transaction).
    pub fn complete_transaction(&self, ctx: &CallContext) -> Result<(), OperationError> {
        let txn = require_transaction(ctx)?;
        self.deps.coordinator.vote_complete(txn)?;
        Ok(())
    }
}

impl Drop for ServiceInstance {
    fn drop(&mut self) {
        debug!(instance = self.id, "instance disposed");
    }
}

fn require_transaction(ctx: &CallContext) -> Result<TransactionId, OperationError> {
    ctx.transaction.ok_or(OperationError::TransactionRequired)
}

/// Pushes `hits` one by one, then the completion marker. Stops at the first
/// failed push: a gone listener means nobody is left to read the rest.
async fn stream_results(
    session: Arc<SessionHandle>,
    hits: Vec<SearchHit>,
    interval: Duration,
    call_id: u64,
) {
    let total = u32::try_from(hits.len()).unwrap_or(u32::MAX);
    for hit in hits {
        tokio::time::sleep(interval).await;
        if let Err(e) = session.sender.push(hit).await {
            metrics::counter!("reel_callback_pushes_total", "outcome" => "failed").increment(1);
            warn!(session = %session.id, call_id, error = %e, "search stopped: push failed");
            return;
        }
        metrics::counter!("reel_callback_pushes_total", "outcome" => "delivered").increment(1);
    }
    if let Err(e) = session.sender.complete(total).await {
        warn!(session = %session.id, call_id, error = %e, "search completion not delivered");
        return;
    }
    debug!(session = %session.id, call_id, count = total, "search completed");
}

// ---------------------------------------------------------------------------
// InstanceService
// ---------------------------------------------------------------------------

/// Innermost tower service: one instance per call, panics contained.
#[derive(Debug, Clone)]
pub struct InstanceService {
    factory: InstanceFactory,
}

impl InstanceService {
    #[must_use]
    pub fn new(factory: InstanceFactory) -> Self {
        Self { factory }
    }
}

impl Service<Operation> for InstanceService {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let factory = self.factory.clone();
        Box::pin(async move {
            let instance = factory.create();
            run_guarded(instance.execute(op)).await
        })
    }
}

/// Awaits `fut`, turning a panic into `OperationError::Panicked`.
pub(crate) async fn run_guarded<F>(fut: F) -> Result<OperationResponse, OperationError>
where
    F: Future<Output = Result<OperationResponse, OperationError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(panic = %message, "service instance panicked");
            Err(OperationError::Panicked(message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use reel_core::{CallbackMessage, FaultKind, SessionId};
    use tower::ServiceExt;

    use super::*;
    use crate::duplex::ChannelConfig;
    use crate::service::operation::operation_names;
    use crate::transaction::{PersonStore, TransactionState};

    fn deps(config: ServerConfig) -> Arc<ServiceDeps> {
        Arc::new(ServiceDeps {
            catalog: Catalog::builtin(),
            coordinator: Arc::new(TransactionCoordinator::new(
                Arc::new(PersonStore::new()),
                Duration::from_secs(60),
            )),
            sessions: Arc::new(SessionRegistry::new(ChannelConfig::default())),
            config: Arc::new(config),
        })
    }

    fn fast_config() -> ServerConfig {
        ServerConfig {
            slow_duration_ms: 50,
            search_push_interval_ms: 1,
            ..ServerConfig::default()
        }
    }

    fn ctx(operation: &'static str, session_id: SessionId) -> CallContext {
        CallContext::new(1, operation, session_id, 60_000)
    }

    #[test]
    fn state_lives_in_one_instance() {
        let factory = InstanceFactory::new(deps(fast_config()));
        let value = Uuid::new_v4();

        let mut first = factory.create();
        first.set_state(value);
        assert_eq!(first.get_data(), value);

        let second = factory.create();
        assert_eq!(second.get_data(), Uuid::nil());
        assert_ne!(first.id(), second.id());
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn each_call_gets_a_fresh_instance() {
        let factory = InstanceFactory::new(deps(fast_config()));
        let svc = InstanceService::new(factory.clone());

        let set = Operation::SetState {
            ctx: ctx(operation_names::SET_STATE, SessionId(1)),
            value: Uuid::new_v4(),
        };
        svc.clone().oneshot(set).await.unwrap();

        let get = Operation::GetData {
            ctx: ctx(operation_names::GET_DATA, SessionId(1)),
        };
        let resp = svc.oneshot(get).await.unwrap();
        assert_eq!(resp, OperationResponse::Data(Uuid::nil()));
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn throw_fault_is_business() {
        let svc = InstanceService::new(InstanceFactory::new(deps(fast_config())));
        let op = Operation::ThrowFault {
            ctx: ctx(operation_names::THROW_FAULT, SessionId(1)),
        };
        let err = svc.oneshot(op).await.unwrap_err();
        assert!(matches!(err, OperationError::Fault(ref f) if f.kind == FaultKind::BUSINESS));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sleeps_configured_duration() {
        let svc = InstanceService::new(InstanceFactory::new(deps(fast_config())));
        let start = tokio::time::Instant::now();
        svc.oneshot(Operation::Slow {
            ctx: ctx(operation_names::SLOW, SessionId(1)),
        })
        .await
        .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn begin_transaction_requires_context() {
        let svc = InstanceService::new(InstanceFactory::new(deps(fast_config())));
        let op = Operation::BeginTransaction {
            ctx: ctx(operation_names::BEGIN_TRANSACTION, SessionId(1)),
            value: Uuid::new_v4(),
        };
        let err = svc.oneshot(op).await.unwrap_err();
        assert!(matches!(err, OperationError::TransactionRequired));
    }

    #[tokio::test]
    async fn begin_and_complete_enlist_under_context() {
        let deps = deps(fast_config());
        let coordinator = Arc::clone(&deps.coordinator);
        let svc = InstanceService::new(InstanceFactory::new(deps));
        let txn = coordinator.begin();
        let value = Uuid::new_v4();

        let mut begin_ctx = ctx(operation_names::BEGIN_TRANSACTION, SessionId(1));
        begin_ctx.transaction = Some(txn);
        svc.clone()
            .oneshot(Operation::BeginTransaction {
                ctx: begin_ctx,
                value,
            })
            .await
            .unwrap();
        assert_eq!(coordinator.state(txn), Some(TransactionState::Enlisted));
        assert!(coordinator.person_exists(Some(txn), &value.to_string()));
        assert!(!coordinator.person_exists(None, &value.to_string()));

        let mut complete_ctx = ctx(operation_names::COMPLETE_TRANSACTION, SessionId(1));
        complete_ctx.transaction = Some(txn);
        svc.oneshot(Operation::CompleteTransaction { ctx: complete_ctx })
            .await
            .unwrap();
        assert_eq!(coordinator.commit(txn), Ok(1));
        assert!(coordinator.person_exists(None, &value.to_string()));
    }

    #[tokio::test]
    async fn search_streams_to_session() {
        let deps = deps(fast_config());
        let sessions = Arc::clone(&deps.sessions);
        let svc = InstanceService::new(InstanceFactory::new(deps));
        let (session, mut listener) = sessions.open();

        let resp = svc
            .oneshot(Operation::Search {
                ctx: ctx(operation_names::SEARCH, session.id),
            })
            .await
            .unwrap();
        assert_eq!(resp, OperationResponse::Ack);

        let mut hits = 0;
        loop {
            match listener.recv().await.unwrap().unwrap() {
                CallbackMessage::Result(_) => hits += 1,
                CallbackMessage::Completed { count } => {
                    assert_eq!(count, hits);
                    break;
                }
            }
        }
        assert_eq!(hits, 10);
    }

    #[tokio::test]
    async fn search_rejects_unknown_or_closed_session() {
        let deps = deps(fast_config());
        let sessions = Arc::clone(&deps.sessions);
        let svc = InstanceService::new(InstanceFactory::new(deps));

        let err = svc
            .clone()
            .oneshot(Operation::Search {
                ctx: ctx(operation_names::SEARCH, SessionId(999)),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::UnknownSession(SessionId(999))));

        let (session, listener) = sessions.open();
        drop(listener);
        let err = svc
            .oneshot(Operation::Search {
                ctx: ctx(operation_names::SEARCH, session.id),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::Channel(ChannelError::Gone)));
    }

    #[tokio::test]
    async fn producer_stops_when_listener_goes_away() {
        let config = ServerConfig {
            search_push_interval_ms: 5,
            ..fast_config()
        };
        let deps = deps(config);
        let sessions = Arc::clone(&deps.sessions);
        let factory = InstanceFactory::new(deps);
        let (session, mut listener) = sessions.open();

        factory
            .create()
            .search(&ctx(operation_names::SEARCH, session.id))
            .unwrap();
        let first = listener.recv().await.unwrap().unwrap();
        assert!(matches!(first, CallbackMessage::Result(_)));
        drop(listener);

        tokio::time::timeout(Duration::from_secs(5), async {
            while session.active_producers() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn explode() -> Result<OperationResponse, OperationError> {
        panic!("boom")
    }

    #[tokio::test]
    async fn panics_become_errors() {
        let result = run_guarded(explode()).await;
        assert!(matches!(result, Err(OperationError::Panicked(ref m)) if m == "boom"));

        let result = run_guarded(async { Ok(OperationResponse::Ack) }).await;
        assert_eq!(result.unwrap(), OperationResponse::Ack);
    }
}
