//! Callback channel halves: the server-side sender and the client-side listener.
//!
//! Each session owns one bounded mpsc channel. The buffered frames are the
//! session's pending result queue; it is destroyed when the listener closes
//! or the session is torn down.

use std::time::Duration;

use reel_core::messages::{self, CallbackMessage, Message};
use reel_core::{SearchHit, SessionId};
use tokio::sync::mpsc;

/// Frame queued for delivery to a client listener.
#[derive(Debug)]
pub enum OutboundMessage {
    /// A `MsgPack`-encoded [`Message::Callback`].
    Frame(Vec<u8>),
    /// The server closed the channel, with an optional reason.
    Close(Option<String>),
}

/// Error returned when pushing to a callback channel fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The channel stayed full for the whole send timeout.
    #[error("callback channel send timed out")]
    Timeout,
    /// The listener was closed or dropped; the client is gone.
    #[error("callback channel is gone")]
    Gone,
    /// The callback could not be encoded.
    #[error("callback frame could not be encoded: {0}")]
    Encode(String),
}

/// Server-side half of a session's callback channel.
#[derive(Debug, Clone)]
pub struct CallbackSender {
    session_id: SessionId,
    tx: mpsc::Sender<OutboundMessage>,
    send_timeout: Duration,
}

impl CallbackSender {
    pub(crate) fn new(
        session_id: SessionId,
        tx: mpsc::Sender<OutboundMessage>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            session_id,
            tx,
            send_timeout,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Pushes one search result to the client.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Gone` immediately if the listener has been
    /// closed, `ChannelError::Timeout` if the channel stays full for the send
    /// timeout.
    pub async fn push(&self, hit: SearchHit) -> Result<(), ChannelError> {
        self.send(CallbackMessage::Result(hit)).await
    }

    /// Signals that no further results follow.
    ///
    /// # Errors
    ///
    /// Same as [`push`](Self::push).
    pub async fn complete(&self, count: u32) -> Result<(), ChannelError> {
        self.send(CallbackMessage::Completed { count }).await
    }

    async fn send(&self, msg: CallbackMessage) -> Result<(), ChannelError> {
        if self.tx.is_closed() {
            return Err(ChannelError::Gone);
        }
        let bytes = messages::encode(&Message::Callback(msg))
            .map_err(|e| ChannelError::Encode(e.to_string()))?;
        match tokio::time::timeout(self.send_timeout, self.tx.send(OutboundMessage::Frame(bytes)))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ChannelError::Gone),
            Err(_) => Err(ChannelError::Timeout),
        }
    }

    /// Queues a close frame without waiting. Returns `false` if the channel
    /// is full or already gone.
    #[must_use]
    pub fn try_close(&self, reason: Option<String>) -> bool {
        self.tx.try_send(OutboundMessage::Close(reason)).is_ok()
    }

    /// Whether the client listener is still receiving.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Errors observed by a [`CallbackListener`] while collecting results.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenerError {
    #[error("callback channel closed after {received} results without completion")]
    Closed { received: usize },
    #[error("no completion within the wait deadline ({received} results received)")]
    TimedOut { received: usize },
    #[error("server closed the callback channel: {reason}")]
    ServerClosed { reason: String },
    #[error("undecodable callback frame: {0}")]
    Decode(String),
    #[error("unexpected {0} frame on the callback channel")]
    Unexpected(&'static str),
}

/// Client-side half of a session's callback channel.
///
/// The listener can be closed at any time, independent of pushes in flight;
/// once closed, server pushes fail with [`ChannelError::Gone`].
#[derive(Debug)]
pub struct CallbackListener {
    session_id: SessionId,
    rx: mpsc::Receiver<OutboundMessage>,
}

impl CallbackListener {
    pub(crate) fn new(session_id: SessionId, rx: mpsc::Receiver<OutboundMessage>) -> Self {
        Self { session_id, rx }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Receives the next callback event.
    ///
    /// Returns `None` once the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<Result<CallbackMessage, ListenerError>> {
        match self.rx.recv().await? {
            OutboundMessage::Frame(bytes) => Some(match messages::decode::<Message>(&bytes) {
                Ok(Message::Callback(msg)) => Ok(msg),
                Ok(other) => Err(ListenerError::Unexpected(other.type_name())),
                Err(e) => Err(ListenerError::Decode(e.to_string())),
            }),
            OutboundMessage::Close(reason) => Some(Err(ListenerError::ServerClosed {
                reason: reason.unwrap_or_else(|| "closed".to_string()),
            })),
        }
    }

    /// Collects results until the completion signal arrives.
    ///
    /// # Errors
    ///
    /// Returns `ListenerError::TimedOut` if completion does not arrive within
    /// `timeout`, `ListenerError::Closed` if the channel ends first, or the
    /// first decode/close error encountered.
    pub async fn wait_for_all_results(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<SearchHit>, ListenerError> {
        let mut results = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, self.recv()).await;
            match next {
                Err(_elapsed) => {
                    return Err(ListenerError::TimedOut {
                        received: results.len(),
                    })
                }
                Ok(None) => {
                    return Err(ListenerError::Closed {
                        received: results.len(),
                    })
                }
                Ok(Some(Ok(CallbackMessage::Result(hit)))) => results.push(hit),
                Ok(Some(Ok(CallbackMessage::Completed { .. }))) => return Ok(results),
                Ok(Some(Err(e))) => return Err(e),
            }
        }
    }

    /// Stops receiving. Buffered frames are discarded and later pushes fail.
    pub fn close(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use reel_core::{TitleId, TitleKind};

    use super::*;

    fn pair(capacity: usize, send_timeout: Duration) -> (CallbackSender, CallbackListener) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            CallbackSender::new(SessionId(1), tx, send_timeout),
            CallbackListener::new(SessionId(1), rx),
        )
    }

    fn hit(rank: u32) -> SearchHit {
        SearchHit {
            rank,
            title_id: TitleId(rank),
            name: format!("title {rank}"),
            kind: TitleKind::Movie,
        }
    }

    #[tokio::test]
    async fn listener_collects_until_completion() {
        let (sender, mut listener) = pair(8, Duration::from_secs(1));
        sender.push(hit(1)).await.unwrap();
        sender.push(hit(2)).await.unwrap();
        sender.complete(2).await.unwrap();

        let results = listener
            .wait_for_all_results(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(results, vec![hit(1), hit(2)]);
    }

    #[tokio::test]
    async fn push_after_listener_closed_is_gone() {
        let (sender, mut listener) = pair(8, Duration::from_secs(1));
        listener.close();
        assert!(!sender.is_connected());
        assert_eq!(sender.push(hit(1)).await, Err(ChannelError::Gone));
    }

    #[tokio::test]
    async fn push_after_listener_dropped_is_gone() {
        let (sender, listener) = pair(8, Duration::from_secs(1));
        drop(listener);
        assert_eq!(sender.complete(0).await, Err(ChannelError::Gone));
    }

    #[tokio::test]
    async fn full_channel_times_out() {
        let (sender, _listener) = pair(1, Duration::from_millis(20));
        sender.push(hit(1)).await.unwrap();
        assert_eq!(sender.push(hit(2)).await, Err(ChannelError::Timeout));
    }

    #[tokio::test]
    async fn sender_dropped_before_completion_reports_partial_count() {
        let (sender, mut listener) = pair(8, Duration::from_secs(1));
        sender.push(hit(1)).await.unwrap();
        drop(sender);
        let err = listener
            .wait_for_all_results(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, ListenerError::Closed { received: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_without_completion() {
        let (sender, mut listener) = pair(8, Duration::from_secs(1));
        sender.push(hit(1)).await.unwrap();
        let err = listener
            .wait_for_all_results(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err, ListenerError::TimedOut { received: 1 });
        drop(sender);
    }

    #[tokio::test]
    async fn close_frame_surfaces_reason() {
        let (sender, mut listener) = pair(8, Duration::from_secs(1));
        assert!(sender.try_close(Some("shutdown".into())));
        let err = listener.recv().await.unwrap().unwrap_err();
        assert_eq!(
            err,
            ListenerError::ServerClosed {
                reason: "shutdown".into()
            }
        );
    }
}
