//! # Connection state cell.
//!
//! [`Link`] holds the observable [`ConnectionState`] (a `watch` channel) and the
//! writer slot of the current TCP session.
//!
//! ## Rules
//! - Only the supervisor calls [`Link::transition`]; invalid moves are rejected.
//! - The writer is installed **before** entering `Connected` and cleared
//!   **before** leaving it, so a caller that sees `Connected` finds a writer
//!   (or observes the next transition).
//! - Every session gets a fresh epoch; subscription arming is keyed by it.
//!
//! ```text
//!                 ┌──────────────── dial failed ─────────────┐
//!                 ▼                                          │
//!           Disconnected ──► Connecting ──► Connected ───────┘ (socket error)
//!                 │               │             │
//!                 └───────────────┴─────────────┴──► Draining (shutdown)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time;

use crate::error::ClientError;

/// Lifecycle state of the device link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session; the supervisor is waiting to redial (or gave up).
    Disconnected,
    /// A dial is in progress.
    Connecting,
    /// A session is up and requests are admitted.
    Connected,
    /// Shutdown in progress; no new requests are admitted.
    Draining,
}

impl ConnectionState {
    /// Returns `true` if the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Disconnected | Connecting | Connected, Draining)
        )
    }

    /// Short stable name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Draining => "draining",
        }
    }
}

/// Sending side of one session's write queue.
#[derive(Clone, Debug)]
pub(crate) struct WriterHandle {
    /// Session epoch the writer belongs to.
    pub epoch: u64,
    /// Frames queued here are written in order by the session's write task.
    pub tx: mpsc::Sender<Bytes>,
}

/// State cell plus writer slot shared by the supervisor and callers.
pub(crate) struct Link {
    state: watch::Sender<ConnectionState>,
    writer: RwLock<Option<WriterHandle>>,
    epoch: AtomicU64,
}

impl Link {
    pub(crate) fn new() -> Self {
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            writer: RwLock::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Applies `next` if allowed; returns whether the state changed.
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|cur| {
            if cur.can_transition_to(next) {
                *cur = next;
                true
            } else {
                false
            }
        })
    }

    /// Allocates the epoch of a new session.
    pub(crate) fn begin_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn install(&self, handle: WriterHandle) {
        *self.writer.write().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub(crate) fn clear_writer(&self) -> Option<WriterHandle> {
        self.writer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Current writer, if a session is up.
    pub(crate) fn writer(&self) -> Option<WriterHandle> {
        self.writer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits up to `wait` for a connected session and returns its writer.
    ///
    /// # Errors
    /// - [`ClientError::Closed`] once the link is draining;
    /// - [`ClientError::NotConnected`] when `wait` elapses first.
    pub(crate) async fn wait_writer(&self, wait: Duration) -> Result<WriterHandle, ClientError> {
        let mut rx = self.state.subscribe();
        let ready = async {
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    ConnectionState::Draining => return Err(ClientError::Closed),
                    ConnectionState::Connected => {
                        if let Some(writer) = self.writer() {
                            return Ok(writer);
                        }
                    }
                    ConnectionState::Disconnected | ConnectionState::Connecting => {}
                }
                if rx.changed().await.is_err() {
                    return Err(ClientError::Closed);
                }
            }
        };
        time::timeout(wait, ready)
            .await
            .unwrap_or(Err(ClientError::NotConnected { waited: wait }))
    }
}
