//! Metrics middleware for operations.
//!
//! Wraps every admitted call in an `operation` span and records its duration
//! and outcome through the `metrics` facade. Installing an exporter is left to
//! the embedding binary.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments calls with a span, a counter and a histogram.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records call duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Short label for an error outcome.
fn outcome_label(err: &OperationError) -> &'static str {
    match err {
        OperationError::Fault(_) => "fault",
        OperationError::AdmissionTimeout { .. } => "admission_timeout",
        OperationError::Timeout { .. } => "timeout",
        OperationError::ShuttingDown => "shutting_down",
        OperationError::TransactionRequired | OperationError::Transaction(_) => "transaction",
        OperationError::UnknownSession(_) | OperationError::Channel(_) => "channel",
        OperationError::Panicked(_) => "panicked",
        OperationError::Internal(_) => "internal",
    }
}

impl<S> Service<Operation> for MetricsService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let operation = op.ctx().operation;
        let call_id = op.ctx().call_id;
        let session = op.ctx().session_id.0;

        let span = info_span!(
            "operation",
            operation = operation,
            call_id = call_id,
            session = session,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(op);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(e) => outcome_label(e),
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "reel_calls_total",
                    "operation" => operation,
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!("reel_call_duration_seconds", "operation" => operation)
                    .record(elapsed.as_secs_f64());

                tracing::info!(
                    operation = operation,
                    call_id = call_id,
                    duration_ms = duration_ms,
                    outcome = outcome,
                    "operation complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
