//! In-process client proxy.
//!
//! Every call is encoded to a `MsgPack` [`Envelope`], dispatched through the
//! server and decoded back, so the client sees exactly what a remote caller
//! would: a response or a fault.

use std::sync::Arc;
use std::time::Duration;

use reel_core::messages::{
    self, BeginTransactionPayload, CodecError, Envelope, Message, ResponsePayload,
    SetStatePayload,
};
use reel_core::{FaultPayload, RequestContext, SearchHit, SessionId, TitleGraph, TransactionId};
use tracing::debug;
use uuid::Uuid;

use crate::duplex::{CallbackListener, ListenerError};
use crate::server::RpcServer;
use crate::transaction::TransactionScope;

/// Communication state of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Opened,
    /// Closed in an orderly way by [`Client::close`].
    Closed,
    /// Torn down by [`Client::abort`].
    Aborted,
}

/// Errors returned by client calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The service answered with a fault.
    #[error("service fault: {0}")]
    Fault(#[from] FaultPayload),
    #[error("client is {0:?}")]
    NotOpen(ClientState),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("unexpected {0} reply")]
    Unexpected(&'static str),
}

impl ClientError {
    /// The fault carried by this error, if the service produced one.
    #[must_use]
    pub fn fault(&self) -> Option<&FaultPayload> {
        match self {
            Self::Fault(f) => Some(f),
            _ => None,
        }
    }
}

/// A client bound to one duplex session.
///
/// Calls take `&self`, so one client can have several calls in flight. The
/// callback listener is owned by the client; [`wait_for_all_results`]
/// drains it.
///
/// [`wait_for_all_results`]: Client::wait_for_all_results
pub struct Client {
    server: Arc<RpcServer>,
    session_id: SessionId,
    listener: CallbackListener,
    state: ClientState,
}

impl Client {
    pub(crate) fn new(
        server: Arc<RpcServer>,
        session_id: SessionId,
        listener: CallbackListener,
    ) -> Self {
        Self {
            server,
            session_id,
            listener,
            state: ClientState::Opened,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    async fn invoke(
        &self,
        body: Message,
        transaction: Option<TransactionId>,
    ) -> Result<ResponsePayload, ClientError> {
        if self.state != ClientState::Opened {
            return Err(ClientError::NotOpen(self.state));
        }
        let envelope = Envelope::new(
            RequestContext {
                session_id: self.session_id,
                transaction,
            },
            body,
        );
        let reply = self
            .server
            .dispatch(self.session_id, messages::encode(&envelope)?)
            .await?;
        match messages::decode::<Message>(&reply)? {
            Message::Response(payload) => Ok(payload),
            Message::Fault(fault) => Err(ClientError::Fault(fault)),
            other => Err(ClientError::Unexpected(other.type_name())),
        }
    }

    async fn invoke_ack(
        &self,
        body: Message,
        transaction: Option<TransactionId>,
    ) -> Result<(), ClientError> {
        match self.invoke(body, transaction).await? {
            ResponsePayload::Ack => Ok(()),
            other => Err(ClientError::Unexpected(payload_name(&other))),
        }
    }

    /// The ten most watched titles.
    ///
    /// # Errors
    ///
    /// Any fault or transport error.
    pub async fn top10(&self) -> Result<TitleGraph, ClientError> {
        match self.invoke(Message::Top10, None).await? {
            ResponsePayload::Titles(graph) => Ok(graph),
            other => Err(ClientError::Unexpected(payload_name(&other))),
        }
    }

    /// Stores `value` in the instance serving this call.
    ///
    /// # Errors
    ///
    /// Any fault or transport error.
    pub async fn set_state(&self, value: Uuid) -> Result<(), ClientError> {
        self.invoke_ack(Message::SetState(SetStatePayload { value }), None)
            .await
    }

    /// Reads the instance state. A fresh instance serves every call, so this
    /// is nil.
    ///
    /// # Errors
    ///
    /// Any fault or transport error.
    pub async fn get_data(&self) -> Result<Uuid, ClientError> {
        match self.invoke(Message::GetData, None).await? {
            ResponsePayload::Data(value) => Ok(value),
            other => Err(ClientError::Unexpected(payload_name(&other))),
        }
    }

    /// # Errors
    ///
    /// Any fault or transport error.
    pub async fn slow(&self) -> Result<(), ClientError> {
        self.invoke_ack(Message::Slow, None).await
    }

    /// Always fails with a `BUSINESS` fault.
    ///
    /// # Errors
    ///
    /// Always.
    pub async fn throw_fault(&self) -> Result<(), ClientError> {
        self.invoke_ack(Message::ThrowFault, None).await
    }

    /// Starts a search. Results arrive on the callback channel; collect them
    /// with [`wait_for_all_results`](Self::wait_for_all_results).
    ///
    /// # Errors
    ///
    /// Any fault or transport error.
    pub async fn search(&self) -> Result<(), ClientError> {
        self.invoke_ack(Message::Search, None).await
    }

    /// Writes a provisional person named after `value` inside `scope`.
    ///
    /// # Errors
    ///
    /// A `TRANSACTION` fault if the scope is no longer active.
    pub async fn begin_transaction(
        &self,
        scope: &TransactionScope,
        value: Uuid,
    ) -> Result<(), ClientError> {
        self.invoke_ack(
            Message::BeginTransaction(BeginTransactionPayload { value }),
            Some(scope.id()),
        )
        .await
    }

    /// Asks the service to vote `scope` ready to commit.
    ///
    /// # Errors
    ///
    /// A `TRANSACTION` fault if the scope is no longer active.
    pub async fn complete_transaction(&self, scope: &TransactionScope) -> Result<(), ClientError> {
        self.invoke_ack(Message::CompleteTransaction, Some(scope.id()))
            .await
    }

    /// Collects pushed search results until completion or `timeout`.
    ///
    /// # Errors
    ///
    /// `Listener` if the wait times out or the channel ends early.
    pub async fn wait_for_all_results(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<SearchHit>, ClientError> {
        if self.state != ClientState::Opened {
            return Err(ClientError::NotOpen(self.state));
        }
        Ok(self.listener.wait_for_all_results(timeout).await?)
    }

    /// Closes the session. Results not yet received are discarded.
    pub fn close(&mut self) {
        self.shut(ClientState::Closed);
    }

    /// Tears the session down at once, stopping any result stream mid-flight.
    pub fn abort(&mut self) {
        self.shut(ClientState::Aborted);
    }

    fn shut(&mut self, to: ClientState) {
        if self.state != ClientState::Opened {
            return;
        }
        self.state = to;
        self.listener.close();
        self.server.sessions().remove(self.session_id);
        debug!(session = %self.session_id, state = ?to, "client shut");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.state == ClientState::Opened {
            self.server.sessions().remove(self.session_id);
        }
    }
}

fn payload_name(payload: &ResponsePayload) -> &'static str {
    match payload {
        ResponsePayload::Titles(_) => "TITLES",
        ResponsePayload::Data(_) => "DATA",
        ResponsePayload::Ack => "ACK",
    }
}
