//! In-process RPC host.
//!
//! [`RpcServer`] wires the collaborators together, owns the call pipeline
//! and runs every call on its own task. Requests arrive as `MsgPack` frames
//! from a [`Client`], which is the only way to reach a session.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reel_core::messages::{self, CodecError, Envelope, Message};
use reel_core::{FaultKind, FaultPayload, RequestContext, SessionId};
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::duplex::SessionRegistry;
use crate::service::catalog::Catalog;
use crate::service::instance::{InstanceFactory, ServiceDeps};
use crate::service::middleware::{build_call_pipeline, AdmissionController, CallPipeline};
use crate::service::reaper::TransactionReaper;
use crate::service::worker::BackgroundWorker;
use crate::service::{OperationResponse, OperationService, ServerConfig};
use crate::shutdown::{LifecycleState, ShutdownController};
use crate::transaction::{AbortReason, PersonStore, TransactionCoordinator, TransactionScope};

/// The service host.
pub struct RpcServer {
    config: Arc<ServerConfig>,
    classifier: OperationService,
    pipeline: Mutex<CallPipeline>,
    admission: Arc<AdmissionController>,
    coordinator: Arc<TransactionCoordinator>,
    sessions: Arc<SessionRegistry>,
    lifecycle: ShutdownController,
    reaper: Mutex<Option<BackgroundWorker<TransactionReaper>>>,
}

impl RpcServer {
    /// Builds the server and starts serving. Must run inside a tokio runtime:
    /// the reaper is spawned here.
    #[must_use]
    pub fn start(config: ServerConfig) -> Arc<Self> {
        let config = Arc::new(config);
        let store = Arc::new(PersonStore::new());
        let coordinator = Arc::new(TransactionCoordinator::new(
            store,
            Duration::from_millis(config.transaction_timeout_ms),
        ));
        let sessions = Arc::new(SessionRegistry::new(config.channel.clone()));

        let deps = Arc::new(ServiceDeps {
            catalog: Catalog::builtin(),
            coordinator: Arc::clone(&coordinator),
            sessions: Arc::clone(&sessions),
            config: Arc::clone(&config),
        });
        let admission = Arc::new(AdmissionController::new(
            config.max_concurrent_calls,
            config.admission_timeout_ms.map(Duration::from_millis),
        ));
        let pipeline = build_call_pipeline(
            InstanceFactory::new(deps),
            Arc::clone(&admission),
            &config,
        );

        let reaper = BackgroundWorker::start(
            TransactionReaper::new(
                Arc::clone(&coordinator),
                Arc::clone(&sessions),
                Duration::from_millis(config.transaction_retention_ms),
            ),
            Duration::from_millis(config.reaper_interval_ms.max(1)),
        );

        let lifecycle = ShutdownController::new();
        lifecycle.set_serving();
        info!(
            max_concurrent_calls = config.max_concurrent_calls,
            admission_timeout_ms = ?config.admission_timeout_ms,
            "server started"
        );

        Arc::new(Self {
            classifier: OperationService::new(Arc::clone(&config)),
            config,
            pipeline: Mutex::new(pipeline),
            admission,
            coordinator,
            sessions,
            lifecycle,
            reaper: Mutex::new(Some(reaper)),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    #[must_use]
    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Opens a duplex session and returns a client bound to it.
    #[must_use]
    pub fn connect(self: &Arc<Self>) -> Client {
        let (session, listener) = self.sessions.open();
        info!(session = %session.id, "client connected");
        Client::new(Arc::clone(self), session.id, listener)
    }

    /// Opens a transaction scope with the configured timeout.
    #[must_use]
    pub fn transaction_scope(&self) -> TransactionScope {
        TransactionScope::begin(Arc::clone(&self.coordinator))
    }

    /// Handles one encoded [`Envelope`] received on the connection bound to
    /// `session` and returns the encoded reply, either `RESPONSE` or `FAULT`.
    ///
    /// The frame is answered with a `BAD_REQUEST` fault frame when it does not
    /// decode, speaks another contract or names a session other than the one
    /// it arrived on.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` only if the reply itself cannot be encoded.
    pub(crate) async fn dispatch(
        self: &Arc<Self>,
        session: SessionId,
        frame: Vec<u8>,
    ) -> Result<Vec<u8>, CodecError> {
        let reply = match Self::accept(session, &frame) {
            Ok(envelope) => match self.call(envelope.context, envelope.body).await {
                Ok(response) => Message::Response(response.into()),
                Err(fault) => Message::Fault(fault),
            },
            Err(fault) => Message::Fault(fault),
        };
        messages::encode(&reply)
    }

    fn accept(session: SessionId, frame: &[u8]) -> Result<Envelope, FaultPayload> {
        let bad_request = |message: String| {
            warn!(%session, reason = %message, "request frame rejected");
            FaultPayload::new(FaultKind::BAD_REQUEST, message)
        };

        let envelope =
            messages::decode::<Envelope>(frame).map_err(|e| bad_request(e.to_string()))?;
        envelope
            .check_contract()
            .map_err(|e| bad_request(e.to_string()))?;
        if envelope.context.session_id != session {
            return Err(bad_request(format!(
                "frame names session {}, connection is session {session}",
                envelope.context.session_id
            )));
        }
        Ok(envelope)
    }

    /// Runs one decoded call to completion on its own task.
    ///
    /// The call task is detached from the caller: if the caller stops
    /// waiting, the call still finishes and releases its admission slot.
    ///
    /// # Errors
    ///
    /// Returns the fault produced by the call, `SHUTTING_DOWN` once shutdown
    /// has begun, or `BAD_REQUEST` for a message that is not a request.
    pub(crate) async fn call(
        self: &Arc<Self>,
        context: RequestContext,
        msg: Message,
    ) -> Result<OperationResponse, FaultPayload> {
        let Some(guard) = self.lifecycle.try_enter() else {
            return Err(FaultPayload::new(
                FaultKind::SHUTTING_DOWN,
                "server is shutting down",
            ));
        };

        let op = self
            .classifier
            .classify(msg, context)
            .map_err(|e| FaultPayload::new(FaultKind::BAD_REQUEST, e.to_string()))?;
        debug!(
            call_id = op.ctx().call_id,
            operation = op.ctx().operation,
            session = %op.ctx().session_id,
            "call accepted"
        );

        let svc = self.pipeline.lock().clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            svc.oneshot(op).await
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "call task failed");
                Err(FaultPayload::internal())
            }
        }
    }

    /// Shuts the server down.
    ///
    /// New calls are rejected at once and queued calls fail with
    /// `SHUTTING_DOWN`. Admitted calls get up to `drain_timeout` to finish.
    /// Afterwards every session is closed, every open transaction aborted
    /// and the reaper stopped. Returns whether all calls drained in time.
    pub async fn shutdown(&self, drain_timeout: Duration) -> bool {
        self.lifecycle.begin_shutdown();
        self.admission.close();

        let drained = self.lifecycle.wait_for_drain(drain_timeout).await;

        let closed = self.sessions.drain_all("server shutting down");
        let aborted = self.coordinator.abort_all(AbortReason::Shutdown);

        let reaper = self.reaper.lock().take();
        if let Some(mut reaper) = reaper {
            reaper.stop().await;
        }

        info!(drained, sessions = closed, transactions = aborted, "server stopped");
        drained
    }
}
