//! WebSocket adapter: accept loop, connection handle, and JSON relay loop.
//!
//! Peers choose their role with the request path:
//!
//! ```text
//! ws://host:8080/client       → joins as a client
//! ws://host:8080/supervisor   → joins as a supervisor
//! anything else               → 404 during the HTTP upgrade
//! ```
//!
//! Every text frame carries one JSON [`Message`].  The sender's `from` is
//! always replaced with the connection's display name, and peers may not
//! send `ERROR` messages.  The adapter goes through
//! the same registry and router calls as the legacy handler, so a WebSocket
//! client can be paired with a legacy supervisor and vice versa.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use relay_core::{ConnectionId, Message, MessageType, Role, TransportKind, SERVER_SENDER};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info, warn};

use super::{accept_loop, ConnectionSettings};
use crate::application::connection::{Connection, ConnectionError, ConnectionInfo};
use crate::application::message_router::{MessageRouter, WAITING_FOR_OTHER_PARTY};

pub const INVALID_MESSAGE_FORMAT: &str = "Invalid message format";
pub const SERVER_SHUTTING_DOWN: &str = "Server is shutting down";

/// Maps a request path to the role it selects.
pub fn role_for_path(path: &str) -> Option<Role> {
    match path.trim_end_matches('/') {
        "/client" => Some(Role::Client),
        "/supervisor" => Some(Role::Supervisor),
        _ => None,
    }
}

// ── Connection handle ─────────────────────────────────────────────────────────

pub struct WebSocketConnection {
    peer_addr: SocketAddr,
    outbound: mpsc::Sender<WsMessage>,
    open: Arc<watch::Sender<bool>>,
}

impl WebSocketConnection {
    /// Creates the handle and spawns a writer task that drains its queue
    /// into `sink`.
    pub fn spawn<S>(sink: S, peer_addr: SocketAddr, settings: &ConnectionSettings) -> Arc<Self>
    where
        S: Sink<WsMessage, Error = WsError> + Unpin + Send + 'static,
    {
        let (outbound, queue) = mpsc::channel(settings.outbound_queue_capacity.max(1));
        let (open, _) = watch::channel(true);
        let open = Arc::new(open);

        tokio::spawn(run_writer(
            sink,
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

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        let mut state = self.open.subscribe();
        let _ = state.wait_for(|open| !*open).await;
    }

    fn enqueue(&self, frame: WsMessage) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::QueueFull,
            TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }
}

impl Connection for WebSocketConnection {
    fn transport(&self) -> TransportKind {
        TransportKind::ModernTransport
    }

    fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(message).map_err(|e| ConnectionError::Encode(e.to_string()))?;
        self.enqueue(WsMessage::Text(json))
    }

    fn announce_shutdown(&self) -> Result<(), ConnectionError> {
        self.send(&Message::disconnect(None, SERVER_SHUTTING_DOWN))
    }

    fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    fn close(&self) {
        if self.open.send_replace(false) {
            debug!(peer = %self.peer_addr, "WebSocket connection closing");
        }
    }
}

async fn run_writer<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<WsMessage>,
    open: Arc<watch::Sender<bool>>,
    write_timeout: Duration,
    peer_addr: SocketAddr,
) where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let mut state = open.subscribe();
    let mut healthy = true;

    loop {
        let frame = tokio::select! {
            frame = queue.recv() => frame,
            _ = state.wait_for(|open| !*open) => break,
        };
        let Some(frame) = frame else { break };
        if let Err(e) = send_one(&mut sink, frame, write_timeout).await {
            warn!(peer = %peer_addr, "closing WebSocket connection: {e:#}");
            healthy = false;
            break;
        }
    }

    if healthy {
        while let Ok(frame) = queue.try_recv() {
            if send_one(&mut sink, frame, write_timeout).await.is_err() {
                break;
            }
        }
        let _ = timeout(write_timeout, sink.send(WsMessage::Close(None))).await;
    }

    open.send_replace(false);
    debug!(peer = %peer_addr, "WebSocket writer finished");
}

async fn send_one<S>(sink: &mut S, frame: WsMessage, limit: Duration) -> anyhow::Result<()>
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    timeout(limit, sink.send(frame))
        .await
        .with_context(|| format!("write timed out after {limit:?}"))?
        .context("write failed")?;
    Ok(())
}

// ── Accept loop ───────────────────────────────────────────────────────────────

pub struct WebSocketAcceptor {
    listener: TcpListener,
}

impl WebSocketAcceptor {
    /// Binds the WebSocket listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is busy or not bindable.
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;
        info!("WebSocket listener on {addr}");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(
        self,
        router: Arc<MessageRouter>,
        settings: Arc<ConnectionSettings>,
        running: Arc<AtomicBool>,
    ) {
        accept_loop(&self.listener, "WebSocket listener", &running, |stream, peer_addr| {
            let router = Arc::clone(&router);
            let settings = Arc::clone(&settings);
            tokio::spawn(async move {
                handle_ws_connection(stream, peer_addr, router, settings).await;
            });
        })
        .await;
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_ws_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<MessageRouter>,
    settings: Arc<ConnectionSettings>,
) {
    match run_ws_session(stream, peer_addr, router, settings).await {
        Ok(()) => info!("WebSocket session {peer_addr} closed normally"),
        Err(e) => warn!("WebSocket session {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_ws_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<MessageRouter>,
    settings: Arc<ConnectionSettings>,
) -> anyhow::Result<()> {
    let mut role = None;
    let select_role = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let path = request.uri().path();
        match role_for_path(path) {
            Some(selected) => {
                role = Some(selected);
                Ok(response)
            }
            None => Err(unknown_endpoint(path)),
        }
    };
    let ws_stream = timeout(settings.handshake_timeout, accept_hdr_async(stream, select_role))
        .await
        .context("WebSocket handshake timed out")?
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;
    let role = role.context("handshake completed without selecting a role")?;

    let (sink, mut stream) = ws_stream.split();
    let connection = WebSocketConnection::spawn(sink, peer_addr, &settings);
    let connection_id = ConnectionId::new();
    let display_name = format!("{role}@{peer_addr}");

    router.registry().register_connection(ConnectionInfo::new(
        connection_id,
        display_name.clone(),
        connection.clone(),
    ));
    let session = match router.registry().create_or_join_session(connection_id, role) {
        Ok(session) => session,
        Err(e) => {
            router.remove_connection(connection_id);
            connection.close();
            return Err(e).context("pairing failed");
        }
    };
    let session_id = session.session_id();
    info!(%connection_id, %session_id, %peer_addr, "WebSocket {role} connected");

    if session.is_paired() {
        router.announce_pairing(session_id);
    } else {
        let notice = Message::text(Some(session_id), SERVER_SENDER, WAITING_FOR_OTHER_PARTY);
        if let Err(e) = connection.send(&notice) {
            debug!(%connection_id, "could not queue waiting notice: {e}");
        }
    }

    let result = relay(&mut stream, connection_id, &display_name, &connection, &router).await;

    router.remove_connection(connection_id);
    connection.close();
    result
}

async fn relay<St>(
    stream: &mut St,
    connection_id: ConnectionId,
    display_name: &str,
    connection: &WebSocketConnection,
    router: &MessageRouter,
) -> anyhow::Result<()>
where
    St: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = connection.closed() => return Ok(()),
        };

        match next {
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<Message>(&text) {
                Ok(message) if message.message_type == MessageType::Disconnect => {
                    debug!(%connection_id, "peer sent DISCONNECT");
                    return Ok(());
                }
                // ERROR notices only ever come from the relay itself.
                Ok(message) if message.message_type == MessageType::Error => {
                    debug!(%connection_id, "peer sent an ERROR message");
                    router.send_error_to_connection(connection_id, INVALID_MESSAGE_FORMAT);
                }
                Ok(mut message) => {
                    message.from = display_name.to_string();
                    router.route_message(connection_id, message);
                }
                Err(e) => {
                    debug!(%connection_id, "unparsable frame: {e}");
                    router.send_error_to_connection(connection_id, INVALID_MESSAGE_FORMAT);
                }
            },
            Some(Ok(WsMessage::Binary(_))) => {
                router.send_error_to_connection(connection_id, INVALID_MESSAGE_FORMAT);
            }
            Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
            // Ping/Pong are answered by tungstenite itself.
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e).context("WebSocket read failed"),
        }
    }
}

fn unknown_endpoint(path: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(format!(
        "unknown endpoint {path}; connect to /client or /supervisor"
    )));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
