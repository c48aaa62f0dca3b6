//! Transport-neutral connection handle.

use std::fmt;
use std::sync::Arc;

use relay_core::{ConnectionId, Message, TransportKind};
use thiserror::Error;

/// Why a send was refused.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectionError {
    #[error("connection is closed")]
    Closed,

    /// The outbound queue is full; the peer is not draining its socket.
    #[error("outbound queue is full")]
    QueueFull,

    #[error("failed to encode outbound message: {0}")]
    Encode(String),
}

/// A live peer, whichever transport it arrived on.
///
/// Implementations never block: `send` only enqueues, and a dedicated writer
/// task owned by the implementation performs the transport write.
pub trait Connection: Send + Sync {
    fn transport(&self) -> TransportKind;

    /// Queues `message` for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the connection is closed, its queue is
    /// full, or the message cannot be encoded for this transport.
    fn send(&self, message: &Message) -> Result<(), ConnectionError>;

    /// Queues the transport's "server is going away" notice.
    fn announce_shutdown(&self) -> Result<(), ConnectionError>;

    fn is_open(&self) -> bool;

    /// Marks the connection closed. Messages already queued are still flushed.
    fn close(&self);
}

/// Registry record for one accepted connection.
#[derive(Clone)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    /// The legacy `clientName`, or a label for WebSocket peers.
    pub display_name: String,
    pub handle: Arc<dyn Connection>,
}

impl ConnectionInfo {
    pub fn new(
        connection_id: ConnectionId,
        display_name: impl Into<String>,
        handle: Arc<dyn Connection>,
    ) -> Self {
        Self {
            connection_id,
            display_name: display_name.into(),
            handle,
        }
    }

    pub fn transport(&self) -> TransportKind {
        self.handle.transport()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("connection_id", &self.connection_id)
            .field("display_name", &self.display_name)
            .field("transport", &self.transport())
            .field("open", &self.is_open())
            .finish()
    }
}
