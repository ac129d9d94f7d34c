//! WebSocket connection handles
//!
//! A [`Connection`] is the server's handle on one live client session. Events
//! are queued on a bounded channel drained by the socket's writer task, so
//! pushing never waits on the remote peer. A peer that stops reading fills
//! its queue and further pushes to it fail.

use std::sync::Arc;

use parley_shared::{ServerEvent, UserId};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Events buffered per connection before pushes to it start failing
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Authenticated identity bound to this connection
    pub user_id: UserId,

    /// Channel to send events to this connection
    sender: mpsc::Sender<ServerEvent>,
}

impl Connection {
    /// Create a new connection
    pub fn new(user_id: UserId, sender: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            sender,
        }
    }

    /// Create a connection together with the receiving end of its queue
    pub fn channel(user_id: UserId) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        (Self::new(user_id, tx), rx)
    }

    /// Send an event to this connection
    ///
    /// Returns Ok(()) if queued, Err if the queue is full or the writer is gone
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), TrySendError<ServerEvent>> {
        self.sender.try_send(event)
    }
}

/// Outcome of a best-effort fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Push `event` to every connection independently.
///
/// A failed push is logged and skipped; it never affects the others.
pub fn push_all(conns: &[Arc<Connection>], event: &ServerEvent) -> PushReport {
    let mut report = PushReport::default();

    for conn in conns {
        match conn.send(event.clone()) {
            Ok(()) => report.delivered += 1,
            Err(TrySendError::Full(_)) => {
                report.failed += 1;
                tracing::warn!(
                    session_id = %conn.session_id,
                    user_id = %conn.user_id,
                    event = event.kind(),
                    "Outbound queue full, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {
                report.failed += 1;
                tracing::warn!(
                    session_id = %conn.session_id,
                    user_id = %conn.user_id,
                    event = event.kind(),
                    "Failed to send event to connection (likely closed)"
                );
            }
        }
    }

    report
}
