use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a client session (one duplex connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Correlation token of a client-driven transaction.
///
/// The client opens a transaction scope, then attaches this token to every
/// call that should take part in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Ambient information a client attaches to each request frame.
/// Threaded from the client call into the server's operation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Session (duplex connection) the request was sent on.
    pub session_id: SessionId,
    /// Transaction flowed with the request, if the client has one open.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transaction: Option<TransactionId>,
}

impl RequestContext {
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            transaction: None,
        }
    }

    #[must_use]
    pub fn with_transaction(mut self, transaction: TransactionId) -> Self {
        self.transaction = Some(transaction);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_are_unique() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }

    #[test]
    fn display_formats() {
        assert_eq!(SessionId(7).to_string(), "session-7");
        let txn = TransactionId(Uuid::nil());
        assert_eq!(txn.to_string(), "txn-00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn absent_transaction_is_not_serialized() {
        let ctx = RequestContext::new(SessionId(1));
        let json = serde_json::to_value(ctx).unwrap();
        assert!(json.get("transaction").is_none());
        assert_eq!(json["sessionId"], 1);
    }
}
