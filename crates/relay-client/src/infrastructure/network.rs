//! TCP link from the client to the relay's legacy socket port.
//!
//! ```text
//! RelayLink::connect ──ConnectionRequest──► relay
//!                    ◄─ConnectionResponse──
//!        │
//!        └─ into_split() ─► (OwnedReadHalf → run_listener, RelaySender ← stdin)
//! ```

use relay_core::domain::message::now_millis;
use relay_core::protocol::{
    read_frame, write_frame, ConnectionRequest, ConnectionResponse, FrameError, LegacyFrame,
    TextMessage,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Errors that can occur in the client network layer.
#[derive(Debug, Error)]
pub enum ClientNetworkError {
    /// TCP connection to the relay failed.
    #[error("failed to connect to relay at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A frame could not be read or written.
    #[error("connection error: {0}")]
    Frame(#[from] FrameError),

    /// The relay answered the handshake with something other than a response.
    #[error("expected ConnectionResponse, got {0}")]
    UnexpectedFrame(&'static str),

    /// The relay refused the ConnectionRequest.
    #[error("relay rejected the connection: {0}")]
    Rejected(String),
}

/// Sends a `ConnectionRequest` on `stream` and waits for the answer.
///
/// # Errors
///
/// [`ClientNetworkError::Rejected`] if the relay refused, or a transport or
/// framing error.
pub async fn handshake<S>(
    stream: &mut S,
    client_name: &str,
    session_id: Option<String>,
) -> Result<ConnectionResponse, ClientNetworkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = LegacyFrame::ConnectionRequest(ConnectionRequest {
        session_id,
        client_name: client_name.to_string(),
    });
    write_frame(stream, &request).await?;

    match read_frame(stream).await? {
        LegacyFrame::ConnectionResponse(response) if response.success => Ok(response),
        LegacyFrame::ConnectionResponse(response) => {
            Err(ClientNetworkError::Rejected(response.reason))
        }
        other => Err(ClientNetworkError::UnexpectedFrame(other.name())),
    }
}

/// An established, accepted connection to the relay.
pub struct RelayLink {
    stream: TcpStream,
    client_name: String,
    response: ConnectionResponse,
}

impl RelayLink {
    /// Connects to `addr` (`host:port`) and completes the handshake.
    ///
    /// # Errors
    ///
    /// See [`handshake`]; also [`ClientNetworkError::ConnectFailed`].
    pub async fn connect(
        addr: &str,
        client_name: &str,
        session_id: Option<String>,
    ) -> Result<Self, ClientNetworkError> {
        let mut stream =
            TcpStream::connect(addr)
                .await
                .map_err(|source| ClientNetworkError::ConnectFailed {
                    addr: addr.to_string(),
                    source,
                })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not set TCP_NODELAY: {e}");
        }

        let response = handshake(&mut stream, client_name, session_id).await?;
        info!(session_id = %response.session_id, "connected to relay: {}", response.reason);
        Ok(Self {
            stream,
            client_name: client_name.to_string(),
            response,
        })
    }

    /// The accepted handshake response.
    pub fn response(&self) -> &ConnectionResponse {
        &self.response
    }

    /// Splits into the read half for the listener and a sender for input.
    pub fn into_split(self) -> (OwnedReadHalf, RelaySender<OwnedWriteHalf>) {
        let (reader, writer) = self.stream.into_split();
        let sender = RelaySender::new(writer, self.response.session_id, self.client_name);
        (reader, sender)
    }
}

/// Writes the user's lines to the relay as `TextMessage` frames.
pub struct RelaySender<W> {
    writer: W,
    session_id: String,
    client_name: String,
}

impl<W> RelaySender<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W, session_id: String, client_name: String) -> Self {
        Self {
            writer,
            session_id,
            client_name,
        }
    }

    /// Sends one line of chat.
    ///
    /// # Errors
    ///
    /// Returns [`ClientNetworkError::Frame`] if the write fails.
    pub async fn send_text(&mut self, content: &str) -> Result<(), ClientNetworkError> {
        let frame = LegacyFrame::TextMessage(TextMessage {
            session_id: self.session_id.clone(),
            sender: self.client_name.clone(),
            content: content.to_string(),
            timestamp_us: now_millis().saturating_mul(1_000),
        });
        write_frame(&mut self.writer, &frame).await?;
        Ok(())
    }

    /// Half-closes the connection; the relay treats this as a disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`ClientNetworkError::Frame`] if the shutdown fails.
    pub async fn close(mut self) -> Result<(), ClientNetworkError> {
        self.writer
            .shutdown()
            .await
            .map_err(|e| ClientNetworkError::Frame(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn answer(
        peer: &mut tokio::io::DuplexStream,
        response: ConnectionResponse,
    ) -> ConnectionRequest {
        let request = match read_frame(peer).await.expect("request") {
            LegacyFrame::ConnectionRequest(request) => request,
            other => panic!("expected ConnectionRequest, got {other:?}"),
        };
        write_frame(peer, &LegacyFrame::ConnectionResponse(response))
            .await
            .expect("write response");
        request
    }

    #[tokio::test]
    async fn test_handshake_accepted() {
        // Arrange
        let (mut client, mut relay) = duplex(4096);
        let server = tokio::spawn(async move {
            answer(&mut relay, ConnectionResponse::accepted("s-1", "Waiting for other party")).await
        });

        // Act
        let response = handshake(&mut client, "Ana", Some("wanted".to_string()))
            .await
            .expect("handshake");

        // Assert
        let request = server.await.expect("relay task");
        assert_eq!(request.client_name, "Ana");
        assert_eq!(request.session_id.as_deref(), Some("wanted"));
        assert_eq!(response.session_id, "s-1");
    }

    #[tokio::test]
    async fn test_handshake_rejected_carries_reason() {
        let (mut client, mut relay) = duplex(4096);
        tokio::spawn(async move {
            answer(&mut relay, ConnectionResponse::rejected("Client name is required")).await
        });

        let result = handshake(&mut client, "", None).await;

        assert!(matches!(
            result,
            Err(ClientNetworkError::Rejected(reason)) if reason == "Client name is required"
        ));
    }

    #[tokio::test]
    async fn test_handshake_unexpected_frame() {
        let (mut client, mut relay) = duplex(4096);
        tokio::spawn(async move {
            let _ = read_frame(&mut relay).await;
            write_frame(&mut relay, &LegacyFrame::ShutdownNotice).await
        });

        let result = handshake(&mut client, "Ana", None).await;

        assert!(matches!(result, Err(ClientNetworkError::UnexpectedFrame("ShutdownNotice"))));
    }

    #[tokio::test]
    async fn test_sender_writes_text_frames_then_closes() {
        // Arrange
        let (writer, mut relay) = duplex(4096);
        let mut sender = RelaySender::new(writer, "s-1".to_string(), "Ana".to_string());

        // Act
        sender.send_text("oi").await.expect("send");
        sender.close().await.expect("close");

        // Assert
        match read_frame(&mut relay).await.expect("frame") {
            LegacyFrame::TextMessage(text) => {
                assert_eq!(text.session_id, "s-1");
                assert_eq!(text.sender, "Ana");
                assert_eq!(text.content, "oi");
                assert!(text.timestamp_us > 0);
            }
            other => panic!("expected TextMessage, got {other:?}"),
        }
        assert!(matches!(read_frame(&mut relay).await, Err(FrameError::Closed)));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        drop(listener);

        let result = RelayLink::connect(&addr, "Ana", None).await;

        assert!(matches!(result, Err(ClientNetworkError::ConnectFailed { .. })));
    }
}
