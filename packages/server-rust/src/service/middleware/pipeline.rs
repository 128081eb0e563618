//! Pipeline composition: combines all middleware layers into a single service stack.

use std::sync::Arc;

use reel_core::FaultPayload;
use tower::util::BoxCloneService;
use tower::ServiceBuilder;

use super::admission::{AdmissionController, AdmissionLayer};
use super::fault::FaultLayer;
use super::metrics::MetricsLayer;
use crate::service::config::ServerConfig;
use crate::service::instance::{InstanceFactory, InstanceService};
use crate::service::operation::{Operation, OperationResponse};

/// The assembled call pipeline, cloneable per call.
pub type CallPipeline = BoxCloneService<Operation, OperationResponse, FaultPayload>;

/// Build the call pipeline around a per-call [`InstanceService`].
///
/// Layer order (outermost to innermost):
/// 1. `FaultLayer` -- every error leaves as a `FaultPayload`
/// 2. `AdmissionLayer` -- wait for a slot, hold it and enforce the deadline
///    until the call finishes
/// 3. `MetricsLayer` -- record timing and outcome (closest to the handler)
#[must_use]
pub fn build_call_pipeline(
    factory: InstanceFactory,
    admission: Arc<AdmissionController>,
    config: &ServerConfig,
) -> CallPipeline {
    let svc = ServiceBuilder::new()
        .layer(FaultLayer::new(config.include_exception_detail))
        .layer(AdmissionLayer::new(admission))
        .layer(MetricsLayer)
        .service(InstanceService::new(factory));
    BoxCloneService::new(svc)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
