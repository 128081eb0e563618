//! Client-side transaction scope.

use std::sync::Arc;

use reel_core::TransactionId;
use tracing::debug;

use super::coordinator::{AbortReason, TransactionCoordinator, TransactionError};

/// A client's handle on an open transaction context.
///
/// Calls that should take part in the transaction are made with the scope's
/// [`id`](Self::id). The decision is explicit: [`commit`](Self::commit) or
/// [`abort`](Self::abort). A scope dropped without either aborts its context,
/// so provisional writes never outlive an abandoned scope.
#[derive(Debug)]
pub struct TransactionScope {
    id: TransactionId,
    coordinator: Arc<TransactionCoordinator>,
    decided: bool,
}

impl TransactionScope {
    /// Opens a new context on `coordinator`.
    #[must_use]
    pub fn begin(coordinator: Arc<TransactionCoordinator>) -> Self {
        let id = coordinator.begin();
        Self {
            id,
            coordinator,
            decided: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Reads through this scope's context: committed rows plus this scope's
    /// provisional writes.
    #[must_use]
    pub fn person_exists(&self, name: &str) -> bool {
        self.coordinator.person_exists(Some(self.id), name)
    }

    /// Commits the context. Returns the number of rows made durable.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::NotVoted` if the service never completed its
    /// writes (the context is aborted), or `NotActive` if the context already
    /// ended, e.g. by timeout.
    pub fn commit(mut self) -> Result<usize, TransactionError> {
        self.decided = true;
        self.coordinator.commit(self.id)
    }

    /// Aborts the context, discarding its provisional writes.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::NotActive` if the context already committed.
    pub fn abort(mut self) -> Result<usize, TransactionError> {
        self.decided = true;
        self.coordinator.abort(self.id, AbortReason::Client)
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.decided {
            return;
        }
        if let Ok(discarded) = self.coordinator.abort(self.id, AbortReason::Discarded) {
            debug!(transaction = %self.id, discarded, "scope dropped without decision");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transaction::{PersonRecord, PersonStore, TransactionState};

    fn coordinator() -> Arc<TransactionCoordinator> {
        Arc::new(TransactionCoordinator::new(
            Arc::new(PersonStore::new()),
            Duration::from_secs(60),
        ))
    }

    #[test]
    fn dropped_scope_aborts() {
        let coord = coordinator();
        let id = {
            let scope = TransactionScope::begin(coord.clone());
            coord.enlist(scope.id(), PersonRecord::new("alice")).unwrap();
            assert!(scope.person_exists("alice"));
            scope.id()
        };
        assert_eq!(coord.state(id), Some(TransactionState::Aborted));
        assert_eq!(coord.abort_reason(id), Some(AbortReason::Discarded));
        assert!(!coord.person_exists(Some(id), "alice"));
    }

    #[test]
    fn committed_scope_is_not_aborted_on_drop() {
        let coord = coordinator();
        let scope = TransactionScope::begin(coord.clone());
        let id = scope.id();
        coord.enlist(id, PersonRecord::new("bob")).unwrap();
        coord.vote_complete(id).unwrap();

        assert_eq!(scope.commit(), Ok(1));
        assert_eq!(coord.state(id), Some(TransactionState::Committed));
        assert!(coord.person_exists(None, "bob"));
    }

    #[test]
    fn explicit_abort() {
        let coord = coordinator();
        let scope = TransactionScope::begin(coord.clone());
        let id = scope.id();
        coord.enlist(id, PersonRecord::new("carol")).unwrap();
        assert_eq!(scope.abort(), Ok(1));
        assert_eq!(coord.abort_reason(id), Some(AbortReason::Client));
    }
}
