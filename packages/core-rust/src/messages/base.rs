//! Request and response payloads for the service operations.
//!
//! All structs use `#[serde(rename_all = "camelCase")]` and are encoded with
//! `rmp_serde::to_vec_named()`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::TitleGraph;

/// Payload for `SET_STATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStatePayload {
    /// Opaque value stored in the handling instance.
    pub value: Uuid,
}

/// Payload for `BEGIN_TRANSACTION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginTransactionPayload {
    /// Value written provisionally under the caller's transaction.
    pub value: Uuid,
}

/// Successful result of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum ResponsePayload {
    /// Result of `TOP10`.
    #[serde(rename = "TITLES")]
    Titles(TitleGraph),
    /// Result of `GET_DATA`; nil when the instance holds no state.
    #[serde(rename = "DATA")]
    Data(Uuid),
    /// Operation completed with no result value.
    #[serde(rename = "ACK")]
    Ack,
}
