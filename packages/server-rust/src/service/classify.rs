//! Message classification: converts `Message` into typed `Operation` variants.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reel_core::messages::Message;
use reel_core::RequestContext;

use super::config::ServerConfig;
use super::operation::{operation_names, CallContext, ClassifyError, Operation};

// ---------------------------------------------------------------------------
// OperationService
// ---------------------------------------------------------------------------

/// Classifies incoming `Message` values into typed `Operation` variants.
///
/// Each call gets a unique call ID and the configured default deadline. The
/// request context's session and transaction flow into the `CallContext`.
pub struct OperationService {
    config: Arc<ServerConfig>,
    call_id_counter: AtomicU64,
}

impl OperationService {
    #[must_use]
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            call_id_counter: AtomicU64::new(1),
        }
    }

    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn make_ctx(&self, operation: &'static str, request: RequestContext) -> CallContext {
        let mut ctx = CallContext::new(
            self.next_call_id(),
            operation,
            request.session_id,
            self.config.default_call_timeout_ms,
        );
        ctx.transaction = request.transaction;
        ctx
    }

    /// Classify a `Message` into an `Operation`.
    ///
    /// # Errors
    ///
    /// Returns `ClassifyError::ServerToClient` for `RESPONSE`, `FAULT` and
    /// `CALLBACK` messages, which only travel from server to client.
    pub fn classify(
        &self,
        msg: Message,
        request: RequestContext,
    ) -> Result<Operation, ClassifyError> {
        match msg {
            Message::Top10 => Ok(Operation::Top10 {
                ctx: self.make_ctx(operation_names::TOP10, request),
            }),
            Message::SetState(payload) => Ok(Operation::SetState {
                ctx: self.make_ctx(operation_names::SET_STATE, request),
                value: payload.value,
            }),
            Message::GetData => Ok(Operation::GetData {
                ctx: self.make_ctx(operation_names::GET_DATA, request),
            }),
            Message::Slow => Ok(Operation::Slow {
                ctx: self.make_ctx(operation_names::SLOW, request),
            }),
            Message::ThrowFault => Ok(Operation::ThrowFault {
                ctx: self.make_ctx(operation_names::THROW_FAULT, request),
            }),
            Message::Search => Ok(Operation::Search {
                ctx: self.make_ctx(operation_names::SEARCH, request),
            }),
            Message::BeginTransaction(payload) => Ok(Operation::BeginTransaction {
                ctx: self.make_ctx(operation_names::BEGIN_TRANSACTION, request),
                value: payload.value,
            }),
            Message::CompleteTransaction => Ok(Operation::CompleteTransaction {
                ctx: self.make_ctx(operation_names::COMPLETE_TRANSACTION, request),
            }),

            msg @ (Message::Response(_) | Message::Fault(_) | Message::Callback(_)) => {
                Err(ClassifyError::ServerToClient {
                    variant: msg.type_name(),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use reel_core::messages::{
        BeginTransactionPayload, CallbackMessage, ResponsePayload, SetStatePayload,
    };
    use reel_core::{FaultPayload, SessionId, TransactionId};
    use uuid::Uuid;

    use super::*;

    fn svc() -> OperationService {
        OperationService::new(Arc::new(ServerConfig::default()))
    }

    fn request() -> RequestContext {
        RequestContext::new(SessionId(5))
    }

    #[test]
    fn call_ids_increase() {
        let svc = svc();
        let a = svc.classify(Message::Top10, request()).unwrap();
        let b = svc.classify(Message::Top10, request()).unwrap();
        assert!(b.ctx().call_id > a.ctx().call_id);
    }

    #[test]
    fn context_carries_session_and_default_deadline() {
        let op = svc().classify(Message::Slow, request()).unwrap();
        assert!(matches!(op, Operation::Slow { .. }));
        assert_eq!(op.ctx().session_id, SessionId(5));
        assert_eq!(op.ctx().operation, operation_names::SLOW);
        assert_eq!(op.ctx().call_timeout_ms, 60_000);
        assert!(op.ctx().transaction.is_none());
    }

    #[test]
    fn transaction_flows_into_context() {
        let txn = TransactionId::new();
        let value = Uuid::new_v4();
        let op = svc()
            .classify(
                Message::BeginTransaction(BeginTransactionPayload { value }),
                request().with_transaction(txn),
            )
            .unwrap();
        assert_eq!(op.ctx().transaction, Some(txn));
        assert!(matches!(op, Operation::BeginTransaction { value: v, .. } if v == value));
    }

    #[test]
    fn set_state_keeps_value() {
        let value = Uuid::new_v4();
        let op = svc()
            .classify(Message::SetState(SetStatePayload { value }), request())
            .unwrap();
        assert!(matches!(op, Operation::SetState { value: v, .. } if v == value));
    }

    #[test]
    fn server_to_client_messages_rejected() {
        let svc = svc();
        for msg in [
            Message::Response(ResponsePayload::Ack),
            Message::Fault(FaultPayload::internal()),
            Message::Callback(CallbackMessage::Completed { count: 0 }),
        ] {
            let name = msg.type_name();
            let err = svc.classify(msg, request()).unwrap_err();
            assert!(matches!(err, ClassifyError::ServerToClient { variant } if variant == name));
        }
    }

    proptest! {
        #[test]
        fn request_values_survive_classification(bytes in any::<[u8; 16]>(), session in any::<u64>()) {
            let value = Uuid::from_bytes(bytes);
            let op = svc()
                .classify(
                    Message::SetState(SetStatePayload { value }),
                    RequestContext::new(SessionId(session)),
                )
                .unwrap();
            prop_assert_eq!(op.ctx().session_id, SessionId(session));
            let kept = matches!(op, Operation::SetState { value: v, .. } if v == value);
            prop_assert!(kept, "classified value differs from the request");
        }
    }
}
