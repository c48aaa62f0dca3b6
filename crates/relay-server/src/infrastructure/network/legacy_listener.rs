//! Legacy socket acceptor and per-connection handler.
//!
//! One [`LegacyAcceptor`] listens per role: peers on the client port become
//! clients, peers on the supervisor port become supervisors.  Every accepted
//! socket gets its own task running this state machine:
//!
//! ```text
//! AWAITING_HANDSHAKE ──ConnectionRequest──► RELAYING ──read error / EOF──► CLOSED
//!         │                                                                  ▲
//!         └──── timeout / wrong frame / empty name / pairing error ──────────┘
//! ```
//!
//! In `RELAYING` each TextMessage becomes a [`Message`] routed to the other
//! party.  Unknown or garbled frames under a valid header are skipped; a bad
//! header ends the connection.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use relay_core::protocol::{read_frame, ConnectionRequest, ConnectionResponse, FrameError, LegacyFrame};
use relay_core::{ConnectionId, Message, Role};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::legacy_conn::LegacySocketConnection;
use super::{accept_loop, ConnectionSettings};
use crate::application::connection::{Connection, ConnectionInfo};
use crate::application::message_router::{MessageRouter, WAITING_FOR_OTHER_PARTY};

pub const CLIENT_NAME_REQUIRED: &str = "Client name is required";
pub const PAIRED_WITH_OTHER_PARTY: &str = "Paired with other party";

/// A bound legacy listener for one role.
pub struct LegacyAcceptor {
    listener: TcpListener,
    role: Role,
}

impl LegacyAcceptor {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is busy or not bindable. Callers treat
    /// this as fatal at startup.
    pub async fn bind(addr: SocketAddr, role: Role) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {role} listener on {addr}"))?;
        info!("legacy {role} listener on {addr}");
        Ok(Self { listener, role })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Runs the accept loop until `running` is cleared, spawning one handler
    /// task per connection.
    pub async fn run(
        self,
        router: Arc<MessageRouter>,
        settings: Arc<ConnectionSettings>,
        running: Arc<AtomicBool>,
    ) {
        let role = self.role;
        let label = format!("legacy {role} listener");
        accept_loop(&self.listener, &label, &running, |stream, peer_addr| {
            let router = Arc::clone(&router);
            let settings = Arc::clone(&settings);
            tokio::spawn(async move {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer_addr, "could not set TCP_NODELAY: {e}");
                }
                handle_legacy_connection(stream, peer_addr, role, router, settings).await;
            });
        })
        .await;
    }
}

/// Drives one legacy peer from handshake to teardown.
pub async fn handle_legacy_connection<S>(
    stream: S,
    peer_addr: SocketAddr,
    role: Role,
    router: Arc<MessageRouter>,
    settings: Arc<ConnectionSettings>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let connection = LegacySocketConnection::spawn(writer, peer_addr, &settings);
    let connection_id = ConnectionId::new();

    // ── AWAITING_HANDSHAKE ────────────────────────────────────────────────────
    let request = match read_handshake(&mut reader, settings.handshake_timeout).await {
        Ok(request) => request,
        Err(e) => {
            warn!(%peer_addr, "handshake failed: {e:#}");
            connection.close();
            return;
        }
    };

    let client_name = request.client_name.trim().to_string();
    if client_name.is_empty() {
        info!(%peer_addr, "rejecting {role} without a name");
        reject(&connection, CLIENT_NAME_REQUIRED);
        return;
    }
    if let Some(requested) = &request.session_id {
        debug!(%peer_addr, %requested, "requested session id ignored; pairing is first come first served");
    }

    router.registry().register_connection(ConnectionInfo::new(
        connection_id,
        client_name.clone(),
        connection.clone(),
    ));
    let session = match router.registry().create_or_join_session(connection_id, role) {
        Ok(session) => session,
        Err(e) => {
            warn!(%connection_id, %peer_addr, "pairing failed: {e}");
            router.remove_connection(connection_id);
            reject(&connection, &e.to_string());
            return;
        }
    };

    let session_id = session.session_id();
    let reason = if session.is_paired() {
        PAIRED_WITH_OTHER_PARTY
    } else {
        WAITING_FOR_OTHER_PARTY
    };
    let response = ConnectionResponse::accepted(session_id.to_string(), reason);
    if let Err(e) = connection.send_frame(LegacyFrame::ConnectionResponse(response)) {
        warn!(%connection_id, "could not queue handshake response: {e}");
        router.remove_connection(connection_id);
        connection.close();
        return;
    }
    info!(%connection_id, %session_id, name = %client_name, "{role} connected; {reason}");

    if session.is_paired() {
        router.announce_pairing(session_id);
    }

    // ── RELAYING ──────────────────────────────────────────────────────────────
    relay(&mut reader, connection_id, &client_name, &connection, &router).await;

    // ── CLOSED ────────────────────────────────────────────────────────────────
    router.remove_connection(connection_id);
    connection.close();
    info!(%connection_id, %peer_addr, "legacy {role} disconnected");
}

async fn read_handshake<R>(reader: &mut R, limit: Duration) -> anyhow::Result<ConnectionRequest>
where
    R: AsyncRead + Unpin,
{
    let frame = timeout(limit, read_frame(reader))
        .await
        .with_context(|| format!("no ConnectionRequest within {limit:?}"))?
        .context("could not read ConnectionRequest")?;
    match frame {
        LegacyFrame::ConnectionRequest(request) => Ok(request),
        other => bail!("expected ConnectionRequest, got {}", other.name()),
    }
}

fn reject(connection: &LegacySocketConnection, reason: &str) {
    let response = ConnectionResponse::rejected(reason);
    if let Err(e) = connection.send_frame(LegacyFrame::ConnectionResponse(response)) {
        debug!(peer = %connection.peer_addr(), "could not queue rejection: {e}");
    }
    connection.close();
}

async fn relay<R>(
    reader: &mut R,
    connection_id: ConnectionId,
    client_name: &str,
    connection: &LegacySocketConnection,
    router: &MessageRouter,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            frame = read_frame(reader) => frame,
            _ = connection.closed() => {
                debug!(%connection_id, "connection closed locally");
                return;
            }
        };

        match frame {
            Ok(LegacyFrame::TextMessage(text)) => {
                router.route_message(connection_id, Message::text(None, client_name, text.content));
            }
            Ok(other) => warn!(%connection_id, "ignoring unexpected {} frame", other.name()),
            Err(e) if e.is_recoverable() => warn!(%connection_id, "skipping unreadable frame: {e}"),
            Err(FrameError::Closed) => {
                debug!(%connection_id, "peer closed the connection");
                return;
            }
            Err(e) => {
                warn!(%connection_id, "read failed: {e}");
                return;
            }
        }
    }
}
