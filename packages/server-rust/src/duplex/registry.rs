//! Session registry for duplex callback channels.
//!
//! Tracks one [`SessionHandle`] per connected client, lock-free via
//! `DashMap`, together with the producer tasks currently pushing into the
//! session. Tearing a session down aborts its producers, so a client that
//! disappears mid-stream never leaves work running against a dead channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use reel_core::SessionId;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use super::channel::{CallbackListener, CallbackSender};
use super::config::ChannelConfig;

/// Handle to a single session, held by the server.
#[derive(Debug)]
pub struct SessionHandle {
    /// Unique session identifier assigned by the registry.
    pub id: SessionId,
    /// Server-side half of the callback channel.
    pub sender: CallbackSender,
    producers: Mutex<Vec<AbortHandle>>,
}

impl SessionHandle {
    /// Registers a task pushing into this session. Finished tasks are pruned.
    pub fn track_producer(&self, handle: AbortHandle) {
        let mut producers = self.producers.lock();
        producers.retain(|h| !h.is_finished());
        producers.push(handle);
    }

    /// Number of producer tasks that have not finished yet.
    #[must_use]
    pub fn active_producers(&self) -> usize {
        self.producers
            .lock()
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Aborts every producer still running. Returns how many were aborted.
    pub fn abort_producers(&self) -> usize {
        let producers = std::mem::take(&mut *self.producers.lock());
        let mut aborted = 0;
        for handle in producers {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }
        aborted
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }
}

/// Thread-safe registry of all open sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    next_id: AtomicU64,
    config: ChannelConfig,
}

impl SessionRegistry {
    /// Creates an empty registry. Session ids start at 1.
    #[must_use]
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Opens a session, returning the server handle and the client listener.
    pub fn open(&self) -> (Arc<SessionHandle>, CallbackListener) {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.config.capacity.max(1));

        let handle = Arc::new(SessionHandle {
            id,
            sender: CallbackSender::new(id, tx, self.config.send_timeout()),
            producers: Mutex::new(Vec::new()),
        });

        self.sessions.insert(id, Arc::clone(&handle));
        debug!(session = %id, "session opened");
        (handle, CallbackListener::new(id, rx))
    }

    /// Looks up a session by id.
    pub fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&id).map(|r| r.value().clone())
    }

    /// Removes a session and aborts its producers.
    pub fn remove(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        let (_, handle) = self.sessions.remove(&id)?;
        let aborted = handle.abort_producers();
        debug!(session = %id, aborted, "session removed");
        Some(handle)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Removes every session whose listener is gone. Returns how many were reaped.
    pub fn reap_disconnected(&self) -> usize {
        let gone: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().is_connected())
            .map(|entry| *entry.key())
            .collect();

        let mut reaped = 0;
        for id in gone {
            if self.remove(id).is_some() {
                reaped += 1;
            }
        }
        if reaped > 0 {
            info!(reaped, "reaped disconnected sessions");
        }
        reaped
    }

    /// Removes all sessions, aborting producers and sending a close frame.
    /// Used during shutdown.
    pub fn drain_all(&self, reason: &str) -> usize {
        let keys: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let mut drained = 0;
        for key in keys {
            if let Some(handle) = self.remove(key) {
                // Intentionally ignore the result: the listener may already be gone.
                let _ = handle.sender.try_close(Some(reason.to_string()));
                drained += 1;
            }
        }
        drained
    }
}
