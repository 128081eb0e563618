//! Call execution framework.
//!
//! This module implements the service-oriented call pipeline:
//!
//! 1. **Classification** (`classify`): `Message` -> `Result<Operation, ClassifyError>`
//! 2. **Middleware** (`middleware`): Tower layers (fault, admission, timeout, metrics)
//! 3. **Instances** (`instance`): a fresh `ServiceInstance` per call
//! 4. **Catalog** (`catalog`): static titles behind `top10` and `search`
//! 5. **Background workers** (`worker`, `reaper`): periodic cleanup

pub mod catalog;
pub mod classify;
pub mod config;
pub mod instance;
pub mod middleware;
pub mod operation;
pub mod reaper;
pub mod worker;

pub use catalog::Catalog;
pub use classify::OperationService;
pub use config::ServerConfig;
pub use instance::{InstanceFactory, InstanceService, ServiceDeps, ServiceInstance};
pub use operation::{
    operation_names, CallContext, ClassifyError, Operation, OperationError, OperationResponse,
};
pub use reaper::{ReaperTask, SweepReport, TransactionReaper};
pub use worker::{BackgroundRunnable, BackgroundWorker};
