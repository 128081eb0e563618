//! Wire message schemas.
//!
//! Every frame is an [`Envelope`]: the contract namespace, the
//! [`RequestContext`] a client attaches to its call and one [`Message`].
//! Frames are encoded with named `MsgPack` (`rmp_serde::to_vec_named()`) and
//! camelCase field names.

pub mod base;
pub mod callback;

pub use base::{BeginTransactionPayload, ResponsePayload, SetStatePayload};
pub use callback::CallbackMessage;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::fault::FaultPayload;

/// Every message exchanged between client and server.
///
/// Client-to-server requests come first; `RESPONSE`, `FAULT` and `CALLBACK`
/// only ever travel from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    #[serde(rename = "TOP10")]
    Top10,
    #[serde(rename = "SET_STATE")]
    SetState(SetStatePayload),
    #[serde(rename = "GET_DATA")]
    GetData,
    #[serde(rename = "SLOW")]
    Slow,
    #[serde(rename = "THROW_FAULT")]
    ThrowFault,
    #[serde(rename = "SEARCH")]
    Search,
    #[serde(rename = "BEGIN_TRANSACTION")]
    BeginTransaction(BeginTransactionPayload),
    #[serde(rename = "COMPLETE_TRANSACTION")]
    CompleteTransaction,

    #[serde(rename = "RESPONSE")]
    Response(ResponsePayload),
    #[serde(rename = "FAULT")]
    Fault(FaultPayload),
    #[serde(rename = "CALLBACK")]
    Callback(CallbackMessage),
}

impl Message {
    /// Wire discriminator of this message.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Top10 => "TOP10",
            Self::SetState(_) => "SET_STATE",
            Self::GetData => "GET_DATA",
            Self::Slow => "SLOW",
            Self::ThrowFault => "THROW_FAULT",
            Self::Search => "SEARCH",
            Self::BeginTransaction(_) => "BEGIN_TRANSACTION",
            Self::CompleteTransaction => "COMPLETE_TRANSACTION",
            Self::Response(_) => "RESPONSE",
            Self::Fault(_) => "FAULT",
            Self::Callback(_) => "CALLBACK",
        }
    }

    /// Whether this message travels from client to server.
    #[must_use]
    pub fn is_request(&self) -> bool {
        !matches!(self, Self::Response(_) | Self::Fault(_) | Self::Callback(_))
    }
}

/// Namespace of the service and data contracts carried in every frame.
pub const CONTRACT_NAMESPACE: &str = "urn:reel:contracts:v1";

/// Framework placeholder namespace. A contract left on it has no identity of
/// its own, so it is never accepted.
pub const PLACEHOLDER_NAMESPACE: &str = "http://tempuri.org/";

/// A single frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Contract namespace the sender was built against.
    pub contract: String,
    pub context: RequestContext,
    pub body: Message,
}

impl Envelope {
    /// Wraps `body` under the current [`CONTRACT_NAMESPACE`].
    #[must_use]
    pub fn new(context: RequestContext, body: Message) -> Self {
        Self {
            contract: CONTRACT_NAMESPACE.to_string(),
            context,
            body,
        }
    }

    /// Checks that the frame speaks the current contract.
    ///
    /// # Errors
    ///
    /// Returns `ContractError::Mismatch` when `contract` differs from
    /// [`CONTRACT_NAMESPACE`].
    pub fn check_contract(&self) -> Result<(), ContractError> {
        if self.contract == CONTRACT_NAMESPACE {
            Ok(())
        } else {
            Err(ContractError::Mismatch {
                found: self.contract.clone(),
            })
        }
    }
}

/// A frame built against another contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("frame uses contract {found:?}, expected {expected:?}", expected = CONTRACT_NAMESPACE)]
    Mismatch { found: String },
}

/// Failure to encode or decode a frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encodes a value as named `MsgPack`.
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decodes a value from `MsgPack` bytes.
///
/// # Errors
///
/// Returns `CodecError::Decode` if the bytes are not a valid encoding of `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
