//! Fault translation: the outermost layer of the call pipeline.
//!
//! Every `OperationError` leaves the server as a [`FaultPayload`]. Business
//! faults pass through untouched; internal failures and panics are reduced to
//! a generic message unless detail is explicitly enabled.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use reel_core::{FaultKind, FaultPayload};
use tower::{Layer, Service};
use tracing::error;

use crate::service::operation::{Operation, OperationError, OperationResponse};

/// Maps an operation error to the fault the client sees.
#[must_use]
pub fn translate(err: &OperationError, include_detail: bool) -> FaultPayload {
    match err {
        OperationError::Fault(fault) => fault.clone(),
        OperationError::AdmissionTimeout { .. } => {
            FaultPayload::new(FaultKind::ADMISSION_TIMEOUT, err.to_string())
        }
        OperationError::Timeout { .. } => FaultPayload::new(FaultKind::TIMEOUT, err.to_string()),
        OperationError::ShuttingDown => {
            FaultPayload::new(FaultKind::SHUTTING_DOWN, err.to_string())
        }
        OperationError::TransactionRequired | OperationError::Transaction(_) => {
            FaultPayload::new(FaultKind::TRANSACTION, err.to_string())
        }
        OperationError::UnknownSession(_) => {
            FaultPayload::new(FaultKind::BAD_REQUEST, err.to_string())
        }
        OperationError::Channel(_) => FaultPayload::new(FaultKind::CHANNEL_GONE, err.to_string()),
        OperationError::Panicked(message) => {
            hide_detail(FaultPayload::internal(), message.clone(), include_detail)
        }
        OperationError::Internal(e) => {
            hide_detail(FaultPayload::internal(), format!("{e:#}"), include_detail)
        }
    }
}

fn hide_detail(fault: FaultPayload, detail: String, include_detail: bool) -> FaultPayload {
    if include_detail {
        fault.with_detail(detail)
    } else {
        fault
    }
}

// ---------------------------------------------------------------------------
// FaultLayer
// ---------------------------------------------------------------------------

/// Tower layer that converts the pipeline's error type to [`FaultPayload`].
#[derive(Debug, Clone)]
pub struct FaultLayer {
    include_detail: bool,
}

impl FaultLayer {
    #[must_use]
    pub fn new(include_detail: bool) -> Self {
        Self { include_detail }
    }
}

impl<S> Layer<S> for FaultLayer {
    type Service = FaultService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FaultService {
            inner,
            include_detail: self.include_detail,
        }
    }
}

// ---------------------------------------------------------------------------
// FaultService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FaultService<S> {
    inner: S,
    include_detail: bool,
}

impl<S> Service<Operation> for FaultService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = FaultPayload;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, FaultPayload>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(|e| translate(&e, self.include_detail))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let include_detail = self.include_detail;
        let call_id = op.ctx().call_id;
        let fut = self.inner.call(op);
        Box::pin(async move {
            fut.await.map_err(|e| {
                if matches!(e, OperationError::Panicked(_) | OperationError::Internal(_)) {
                    error!(call_id, error = %e, "call failed internally");
                }
                translate(&e, include_detail)
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use reel_core::{SessionId, TransactionId};

    use super::*;
    use crate::duplex::ChannelError;
    use crate::transaction::TransactionError;

    #[test]
    fn business_fault_passes_through() {
        let fault = FaultPayload::business("no such title");
        let out = translate(&OperationError::Fault(fault.clone()), false);
        assert_eq!(out, fault);
    }

    #[test]
    fn kinds_follow_error_variants() {
        let cases = [
            (
                OperationError::AdmissionTimeout { waited_ms: 10 },
                FaultKind::ADMISSION_TIMEOUT,
            ),
            (OperationError::Timeout { timeout_ms: 10 }, FaultKind::TIMEOUT),
            (OperationError::ShuttingDown, FaultKind::SHUTTING_DOWN),
            (OperationError::TransactionRequired, FaultKind::TRANSACTION),
            (
                OperationError::Transaction(TransactionError::Unknown(TransactionId::new())),
                FaultKind::TRANSACTION,
            ),
            (OperationError::UnknownSession(SessionId(9)), FaultKind::BAD_REQUEST),
            (OperationError::Channel(ChannelError::Gone), FaultKind::CHANNEL_GONE),
        ];
        for (err, kind) in cases {
            assert_eq!(translate(&err, false).kind, kind, "{err}");
        }
    }

    #[test]
    fn internal_detail_hidden_by_default() {
        let err = OperationError::Internal(anyhow::anyhow!("disk on fire"));
        let fault = translate(&err, false);
        assert_eq!(fault, FaultPayload::internal());

        let fault = translate(&err, true);
        assert_eq!(fault.kind, FaultKind::INTERNAL);
        assert_eq!(fault.detail.as_deref(), Some("disk on fire"));
    }

    #[test]
    fn panic_message_only_with_detail() {
        let err = OperationError::Panicked("index out of bounds".to_owned());
        assert!(translate(&err, false).detail.is_none());
        assert_eq!(
            translate(&err, true).detail.as_deref(),
            Some("index out of bounds")
        );
    }
}
