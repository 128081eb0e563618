//! Typed fault payloads delivered to callers in place of raw failures.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a fault. Clients branch on this, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
pub enum FaultKind {
    /// Deliberate operation failure raised by service logic.
    BUSINESS,
    /// The call waited longer than the admission bound for a free slot.
    ADMISSION_TIMEOUT,
    /// The call was admitted but did not finish within its deadline.
    TIMEOUT,
    /// Transaction flow failed: missing, inactive, or aborted context.
    TRANSACTION,
    /// The duplex callback channel of the session is gone.
    CHANNEL_GONE,
    /// The request frame could not be decoded or was not a request.
    BAD_REQUEST,
    /// The server is draining and accepts no new calls.
    SHUTTING_DOWN,
    /// Any other failure inside the service.
    INTERNAL,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BUSINESS => "BUSINESS",
            Self::ADMISSION_TIMEOUT => "ADMISSION_TIMEOUT",
            Self::TIMEOUT => "TIMEOUT",
            Self::TRANSACTION => "TRANSACTION",
            Self::CHANNEL_GONE => "CHANNEL_GONE",
            Self::BAD_REQUEST => "BAD_REQUEST",
            Self::SHUTTING_DOWN => "SHUTTING_DOWN",
            Self::INTERNAL => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// Structured fault surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct FaultPayload {
    pub kind: FaultKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
}

impl FaultPayload {
    #[must_use]
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn business(message: impl Into<String>) -> Self {
        Self::new(FaultKind::BUSINESS, message)
    }

    #[must_use]
    pub fn internal() -> Self {
        Self::new(FaultKind::INTERNAL, "the service failed to process the call")
    }

    /// Faults the caller may retry without changing the request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            FaultKind::ADMISSION_TIMEOUT | FaultKind::TIMEOUT | FaultKind::SHUTTING_DOWN
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let fault = FaultPayload::business("no such title");
        assert_eq!(fault.to_string(), "BUSINESS: no such title");
    }

    #[test]
    fn detail_is_optional_on_the_wire() {
        let fault = FaultPayload::internal();
        let json = serde_json::to_value(&fault).unwrap();
        assert_eq!(json["kind"], "INTERNAL");
        assert!(json.get("detail").is_none());

        let fault = fault.with_detail("stack");
        let bytes = rmp_serde::to_vec_named(&fault).unwrap();
        let decoded: FaultPayload = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded.detail.as_deref(), Some("stack"));
    }

    #[test]
    fn retryable_kinds() {
        assert!(FaultPayload::new(FaultKind::ADMISSION_TIMEOUT, "busy").is_retryable());
        assert!(!FaultPayload::business("nope").is_retryable());
        assert!(!FaultPayload::internal().is_retryable());
    }
}
