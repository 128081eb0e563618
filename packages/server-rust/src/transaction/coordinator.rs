//! Transaction coordinator: provisional writes correlated by a client-driven
//! transaction context.
//!
//! State machine per context:
//!
//! ```text
//! Started --enlist--> Enlisted --commit--> Committed
//!    |                   |
//!    +------abort--------+-----> Aborted
//! ```
//!
//! Writes enlisted under a context are visible only to readers that pass the
//! same context while it is active. Commit applies them to the
//! [`PersonStore`]; abort drops them. A context commits only if every write
//! it enlisted was covered by a completion vote from the server; otherwise
//! commit aborts it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reel_core::TransactionId;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::store::{PersonRecord, PersonStore};

/// Lifecycle state of a transaction context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Opened by the client; nothing written yet.
    Started,
    /// At least one provisional write is enlisted.
    Enlisted,
    /// Writes applied to the store (terminal).
    Committed,
    /// Writes discarded (terminal).
    Aborted,
}

impl TransactionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Enlisted => "enlisted",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        }
    }
}

/// Why a transaction was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The client aborted explicitly.
    Client,
    /// The client scope was dropped without a decision.
    Discarded,
    /// The client committed before the server voted the writes complete.
    NotVoted,
    /// The transaction outlived its timeout.
    TimedOut,
    /// The server shut down.
    Shutdown,
}

impl AbortReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Discarded => "discarded",
            Self::NotVoted => "not_voted",
            Self::TimedOut => "timed_out",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Errors from transaction operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("unknown transaction {0}")]
    Unknown(TransactionId),
    #[error("transaction {id} is {state:?}, not active")]
    NotActive {
        id: TransactionId,
        state: TransactionState,
    },
    #[error("transaction {0} was aborted: the service never completed its writes")]
    NotVoted(TransactionId),
}

#[derive(Debug)]
struct TransactionEntry {
    state: TransactionState,
    writes: Vec<PersonRecord>,
    /// Number of leading `writes` covered by a completion vote.
    voted_upto: usize,
    started_at: Instant,
    timeout: Duration,
    finished_at: Option<Instant>,
    abort_reason: Option<AbortReason>,
}

impl TransactionEntry {
    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.finished_at = Some(Instant::now());
    }

    fn ensure_active(&self, id: TransactionId) -> Result<(), TransactionError> {
        if self.state.is_terminal() {
            Err(TransactionError::NotActive {
                id,
                state: self.state,
            })
        } else {
            Ok(())
        }
    }

    fn fully_voted(&self) -> bool {
        self.voted_upto == self.writes.len()
    }
}

/// Coordinates transaction contexts and their provisional writes.
#[derive(Debug)]
pub struct TransactionCoordinator {
    transactions: DashMap<TransactionId, TransactionEntry>,
    store: Arc<PersonStore>,
    default_timeout: Duration,
}

impl TransactionCoordinator {
    #[must_use]
    pub fn new(store: Arc<PersonStore>, default_timeout: Duration) -> Self {
        Self {
            transactions: DashMap::new(),
            store,
            default_timeout,
        }
    }

    /// The committed store this coordinator applies writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<PersonStore> {
        &self.store
    }

    /// Opens a context with the default timeout.
    pub fn begin(&self) -> TransactionId {
        self.begin_with_timeout(self.default_timeout)
    }

    /// Opens a context that the reaper aborts once `timeout` has elapsed.
    pub fn begin_with_timeout(&self, timeout: Duration) -> TransactionId {
        let id = TransactionId::new();
        self.transactions.insert(
            id,
            TransactionEntry {
                state: TransactionState::Started,
                writes: Vec::new(),
                voted_upto: 0,
                started_at: Instant::now(),
                timeout,
                finished_at: None,
                abort_reason: None,
            },
        );
        debug!(transaction = %id, "transaction started");
        id
    }

    #[must_use]
    pub fn state(&self, id: TransactionId) -> Option<TransactionState> {
        self.transactions.get(&id).map(|e| e.state)
    }

    #[must_use]
    pub fn abort_reason(&self, id: TransactionId) -> Option<AbortReason> {
        self.transactions.get(&id).and_then(|e| e.abort_reason)
    }

    #[must_use]
    pub fn is_active(&self, id: TransactionId) -> bool {
        self.state(id).is_some_and(|s| !s.is_terminal())
    }

    /// Enlists a provisional write under `id`.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::Unknown` for an id that was never begun (or
    /// already purged), `TransactionError::NotActive` once it is terminal.
    pub fn enlist(&self, id: TransactionId, record: PersonRecord) -> Result<(), TransactionError> {
        let mut entry = self
            .transactions
            .get_mut(&id)
            .ok_or(TransactionError::Unknown(id))?;
        entry.ensure_active(id)?;
        debug!(transaction = %id, name = %record.name, "write enlisted");
        entry.writes.push(record);
        entry.state = TransactionState::Enlisted;
        Ok(())
    }

    /// Records the service's vote that the writes enlisted so far may commit.
    /// Writes enlisted after the vote need a vote of their own.
    ///
    /// # Errors
    ///
    /// Same as [`enlist`](Self::enlist).
    pub fn vote_complete(&self, id: TransactionId) -> Result<(), TransactionError> {
        let mut entry = self
            .transactions
            .get_mut(&id)
            .ok_or(TransactionError::Unknown(id))?;
        entry.ensure_active(id)?;
        entry.voted_upto = entry.writes.len();
        debug!(transaction = %id, writes = entry.voted_upto, "transaction voted complete");
        Ok(())
    }

    /// Commits `id`, applying its writes to the store. Returns the number of
    /// rows written.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::NotVoted` (and aborts the transaction) when
    /// any enlisted write was never voted complete; `Unknown`/`NotActive`
    /// as for [`enlist`](Self::enlist).
    pub fn commit(&self, id: TransactionId) -> Result<usize, TransactionError> {
        let mut entry = self
            .transactions
            .get_mut(&id)
            .ok_or(TransactionError::Unknown(id))?;
        entry.ensure_active(id)?;

        if !entry.fully_voted() {
            entry.writes.clear();
            entry.abort_reason = Some(AbortReason::NotVoted);
            entry.finish(TransactionState::Aborted);
            drop(entry);
            record_outcome(TransactionState::Aborted, Some(AbortReason::NotVoted));
            warn!(transaction = %id, "commit without completion vote, aborted");
            return Err(TransactionError::NotVoted(id));
        }

        let writes = std::mem::take(&mut entry.writes);
        let count = writes.len();
        for record in writes {
            self.store.put(record);
        }
        entry.finish(TransactionState::Committed);
        drop(entry);
        record_outcome(TransactionState::Committed, None);
        info!(transaction = %id, rows = count, "transaction committed");
        Ok(count)
    }

    /// Aborts `id`, discarding its provisional writes. Aborting an already
    /// aborted transaction is a no-op. Returns the number of writes discarded.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::Unknown` for an unknown id and
    /// `TransactionError::NotActive` if it already committed.
    pub fn abort(&self, id: TransactionId, reason: AbortReason) -> Result<usize, TransactionError> {
        let mut entry = self
            .transactions
            .get_mut(&id)
            .ok_or(TransactionError::Unknown(id))?;
        match entry.state {
            TransactionState::Aborted => return Ok(0),
            TransactionState::Committed => {
                return Err(TransactionError::NotActive {
                    id,
                    state: entry.state,
                })
            }
            TransactionState::Started | TransactionState::Enlisted => {}
        }
        let discarded = entry.writes.len();
        entry.writes.clear();
        entry.abort_reason = Some(reason);
        entry.finish(TransactionState::Aborted);
        drop(entry);
        record_outcome(TransactionState::Aborted, Some(reason));
        info!(transaction = %id, reason = reason.as_str(), discarded, "transaction aborted");
        Ok(discarded)
    }

    /// Read path: is there a person named `name`?
    ///
    /// Sees committed rows, plus the provisional writes of `transaction` while
    /// that context is active. Terminal contexts contribute nothing.
    #[must_use]
    pub fn person_exists(&self, transaction: Option<TransactionId>, name: &str) -> bool {
        // Context first: a commit applies rows to the store while holding the
        // entry, so a reader blocked behind it finds them in the store next.
        let provisional = transaction.is_some_and(|id| {
            self.transactions.get(&id).is_some_and(|entry| {
                !entry.state.is_terminal() && entry.writes.iter().any(|w| w.name == name)
            })
        });
        provisional || self.store.contains(name)
    }

    /// Aborts every active transaction older than its timeout.
    pub fn expire(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<TransactionId> = self
            .transactions
            .iter()
            .filter(|e| !e.state.is_terminal() && now.duration_since(e.started_at) >= e.timeout)
            .map(|e| *e.key())
            .collect();

        expired
            .into_iter()
            .filter(|id| self.abort(*id, AbortReason::TimedOut).is_ok())
            .count()
    }

    /// Forgets terminal transactions that finished more than `retention` ago.
    pub fn purge_terminal(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let before = self.transactions.len();
        self.transactions.retain(|_, e| match e.finished_at {
            Some(at) => now.duration_since(at) < retention,
            None => true,
        });
        before - self.transactions.len()
    }

    /// Aborts every active transaction. Used during shutdown.
    pub fn abort_all(&self, reason: AbortReason) -> usize {
        let active: Vec<TransactionId> = self
            .transactions
            .iter()
            .filter(|e| !e.state.is_terminal())
            .map(|e| *e.key())
            .collect();
        active
            .into_iter()
            .filter(|id| self.abort(*id, reason).is_ok())
            .count()
    }

    /// Number of transactions not yet committed or aborted.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.transactions
            .iter()
            .filter(|e| !e.state.is_terminal())
            .count()
    }
}

fn record_outcome(state: TransactionState, reason: Option<AbortReason>) {
    metrics::counter!(
        "reel_transactions_total",
        "outcome" => state.as_str(),
        "reason" => reason.map_or("none", AbortReason::as_str),
    )
    .increment(1);
}
