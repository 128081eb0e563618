//! Server-to-client callback events pushed over the duplex channel.

use serde::{Deserialize, Serialize};

use crate::types::SearchHit;

/// Event delivered to a client's callback listener.
///
/// A search produces zero or more `RESULT` events followed by exactly one
/// `COMPLETED` event unless the channel is torn down first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum CallbackMessage {
    #[serde(rename = "RESULT")]
    Result(SearchHit),
    #[serde(rename = "COMPLETED")]
    Completed {
        /// Number of `RESULT` events pushed before completion.
        count: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TitleId, TitleKind};

    #[test]
    fn result_roundtrip() {
        let msg = CallbackMessage::Result(SearchHit {
            rank: 1,
            title_id: TitleId(3),
            name: "Dark".into(),
            kind: TitleKind::Serie,
        });
        let bytes = rmp_serde::to_vec_named(&msg).unwrap();
        let decoded: CallbackMessage = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn completed_serializes_count() {
        let json = serde_json::to_value(CallbackMessage::Completed { count: 4 }).unwrap();
        assert_eq!(json["event"], "COMPLETED");
        assert_eq!(json["data"]["count"], 4);
    }
}
