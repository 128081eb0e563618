//! Transaction flow from client to server.
//!
//! - [`TransactionCoordinator`]: per-context state machine and provisional writes
//! - [`TransactionScope`]: the client's explicit commit/abort handle
//! - [`PersonStore`]: committed, globally visible rows

pub mod coordinator;
pub mod scope;
pub mod store;

pub use coordinator::{AbortReason, TransactionCoordinator, TransactionError, TransactionState};
pub use scope::TransactionScope;
pub use store::{PersonRecord, PersonStore};
