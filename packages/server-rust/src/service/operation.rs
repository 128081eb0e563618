//! Operation types dispatched through the call pipeline.

use reel_core::{FaultPayload, ResponsePayload, SessionId, TitleGraph, TransactionId};
use uuid::Uuid;

use crate::duplex::ChannelError;
use crate::transaction::TransactionError;

/// Operation names, used as span/metric labels.
pub mod operation_names {
    pub const TOP10: &str = "top10";
    pub const SET_STATE: &str = "set_state";
    pub const GET_DATA: &str = "get_data";
    pub const SLOW: &str = "slow";
    pub const THROW_FAULT: &str = "throw_fault";
    pub const SEARCH: &str = "search";
    pub const BEGIN_TRANSACTION: &str = "begin_transaction";
    pub const COMPLETE_TRANSACTION: &str = "complete_transaction";
}

/// Context carried with every operation through the pipeline.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub call_id: u64,
    pub operation: &'static str,
    pub session_id: SessionId,
    /// Transaction flowed from the client with this call.
    pub transaction: Option<TransactionId>,
    pub call_timeout_ms: u64,
}

impl CallContext {
    #[must_use]
    pub fn new(
        call_id: u64,
        operation: &'static str,
        session_id: SessionId,
        call_timeout_ms: u64,
    ) -> Self {
        Self {
            call_id,
            operation,
            session_id,
            transaction: None,
            call_timeout_ms,
        }
    }
}

/// Typed operation variants dispatched through the pipeline.
#[derive(Debug)]
pub enum Operation {
    Top10 { ctx: CallContext },
    SetState { ctx: CallContext, value: Uuid },
    GetData { ctx: CallContext },
    Slow { ctx: CallContext },
    ThrowFault { ctx: CallContext },
    Search { ctx: CallContext },
    BeginTransaction { ctx: CallContext, value: Uuid },
    CompleteTransaction { ctx: CallContext },
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &CallContext {
        match self {
            Self::Top10 { ctx }
            | Self::SetState { ctx, .. }
            | Self::GetData { ctx }
            | Self::Slow { ctx }
            | Self::ThrowFault { ctx }
            | Self::Search { ctx }
            | Self::BeginTransaction { ctx, .. }
            | Self::CompleteTransaction { ctx } => ctx,
        }
    }
}

/// Successful response from an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResponse {
    Titles(TitleGraph),
    Data(Uuid),
    Ack,
}

impl From<OperationResponse> for ResponsePayload {
    fn from(resp: OperationResponse) -> Self {
        match resp {
            OperationResponse::Titles(graph) => Self::Titles(graph),
            OperationResponse::Data(value) => Self::Data(value),
            OperationResponse::Ack => Self::Ack,
        }
    }
}

/// Errors raised while executing an operation. Never sent to clients as-is:
/// the fault translator turns each into a [`FaultPayload`].
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("{0}")]
    Fault(FaultPayload),
    #[error("no admission slot within {waited_ms}ms")]
    AdmissionTimeout { waited_ms: u64 },
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("operation requires a transaction but none flowed with the call")]
    TransactionRequired,
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("operation panicked: {0}")]
    Panicked(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Errors from classifying a `Message` into an `Operation`.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("server-to-client message cannot be classified as operation: {variant}")]
    ServerToClient { variant: &'static str },
}
