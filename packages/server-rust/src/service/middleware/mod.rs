//! Tower middleware layers for the call pipeline.
//!
//! - [`fault`]: Error-to-fault translation (outermost)
//! - [`admission`]: FIFO concurrency limiting with scoped release and the
//!   per-call deadline
//! - [`metrics`]: Call timing and counting via `tracing` spans and `metrics`
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod admission;
pub mod fault;
pub mod metrics;
pub mod pipeline;

pub use admission::{AdmissionController, AdmissionLayer, AdmissionLease};
pub use fault::{translate, FaultLayer};
pub use metrics::MetricsLayer;
pub use pipeline::{build_call_pipeline, CallPipeline};
