//! Connection handle for legacy socket peers.
//!
//! `send` never touches the socket.  Frames are encoded on the caller's side
//! and the bytes go into a bounded queue that a dedicated writer task drains,
//! each write bounded by the configured write timeout.  A frame that cannot
//! be encoded is refused at `send`; only a write that fails or times out
//! closes the connection.
//!
//! ```text
//!  router ──send()──encode──► mpsc queue ──► writer task ──write_all──► socket
//!                                        ▲
//!                     close() ── watch ──┘  (flush queued frames, then FIN)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use relay_core::protocol::{encode_frame, LegacyFrame, TextMessage};
use relay_core::{Message, TransportKind};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::ConnectionSettings;
use crate::application::connection::{Connection, ConnectionError};

/// An encoded frame waiting for the writer.
struct EncodedFrame {
    name: &'static str,
    bytes: Vec<u8>,
}

pub struct LegacySocketConnection {
    peer_addr: SocketAddr,
    outbound: mpsc::Sender<EncodedFrame>,
    /// `true` while open; flipped once by `close` or by the writer on failure.
    open: Arc<watch::Sender<bool>>,
}

impl LegacySocketConnection {
    /// Creates the handle and spawns its writer task on `writer`.
    pub fn spawn<W>(writer: W, peer_addr: SocketAddr, settings: &ConnectionSettings) -> Arc<Self>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, queue) = mpsc::channel(settings.outbound_queue_capacity.max(1));
        let (open, _) = watch::channel(true);
        let open = Arc::new(open);

        tokio::spawn(run_writer(
            writer,
            queue,
            Arc::clone(&open),
            settings.write_timeout,
            peer_addr,
        ));

        Arc::new(Self {
            peer_addr,
            outbound,
            open,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Encodes and queues a raw frame.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Closed`] after `close`, [`ConnectionError::QueueFull`]
    /// when the peer is not keeping up, [`ConnectionError::Encode`] when the
    /// frame is over the payload limit.  An oversized frame leaves the
    /// connection open.
    pub fn send_frame(&self, frame: LegacyFrame) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        let bytes = encode_frame(&frame).map_err(|e| ConnectionError::Encode(e.to_string()))?;
        let encoded = EncodedFrame {
            name: frame.name(),
            bytes,
        };
        self.outbound.try_send(encoded).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::QueueFull,
            TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    /// Resolves once the connection has been closed, locally or by the writer.
    pub async fn closed(&self) {
        let mut state = self.open.subscribe();
        // An error means the sender is gone, which also means closed.
        let _ = state.wait_for(|open| !*open).await;
    }
}

impl Connection for LegacySocketConnection {
    fn transport(&self) -> TransportKind {
        TransportKind::LegacySocket
    }

    fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        self.send_frame(LegacyFrame::TextMessage(TextMessage::from(message)))
    }

    fn announce_shutdown(&self) -> Result<(), ConnectionError> {
        self.send_frame(LegacyFrame::ShutdownNotice)
    }

    fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    fn close(&self) {
        if self.open.send_replace(false) {
            debug!(peer = %self.peer_addr, "legacy connection closing");
        }
    }
}

/// Drains `queue` onto `writer` until the connection closes.
///
/// On a local close the frames already queued are still written, so a
/// ShutdownNotice queued just before `close` reaches the peer.
async fn run_writer<W>(
    mut writer: W,
    mut queue: mpsc::Receiver<EncodedFrame>,
    open: Arc<watch::Sender<bool>>,
    write_timeout: Duration,
    peer_addr: SocketAddr,
) where
    W: AsyncWrite + Unpin,
{
    let mut state = open.subscribe();
    let mut healthy = true;

    loop {
        let frame = tokio::select! {
            frame = queue.recv() => frame,
            _ = state.wait_for(|open| !*open) => break,
        };
        let Some(frame) = frame else { break };
        if let Err(e) = write_one(&mut writer, &frame, write_timeout).await {
            warn!(peer = %peer_addr, "closing legacy connection: {e:#}");
            healthy = false;
            break;
        }
    }

    if healthy {
        while let Ok(frame) = queue.try_recv() {
            if let Err(e) = write_one(&mut writer, &frame, write_timeout).await {
                debug!(peer = %peer_addr, "dropping queued frames: {e:#}");
                break;
            }
        }
        let _ = timeout(write_timeout, writer.shutdown()).await;
    }

    open.send_replace(false);
    debug!(peer = %peer_addr, "legacy writer finished");
}

async fn write_one<W>(writer: &mut W, frame: &EncodedFrame, limit: Duration) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(&frame.bytes).await?;
        writer.flush().await
    };
    timeout(limit, write)
        .await
        .with_context(|| format!("{} write timed out after {limit:?}", frame.name))?
        .with_context(|| format!("{} write failed", frame.name))?;
    Ok(())
}
