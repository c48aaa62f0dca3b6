//! End-to-end relay tests over real sockets on 127.0.0.1.
//!
//! Each test starts the three acceptors on ephemeral ports and talks to them
//! the way real peers would: legacy peers with the framed protocol, web peers
//! with JSON over WebSocket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relay_core::protocol::{
    read_frame, write_frame, ConnectionRequest, ConnectionResponse, FrameError, LegacyFrame,
    TextMessage,
};
use relay_core::{Message, MessageType, Role, SERVER_SENDER};
use relay_server::application::message_router::{
    MessageRouter, OTHER_PARTY_DISCONNECTED, SESSION_PAIRED, WAITING_FOR_OTHER_PARTY,
};
use relay_server::application::session_registry::SessionRegistry;
use relay_server::infrastructure::network::legacy_listener::{
    LegacyAcceptor, PAIRED_WITH_OTHER_PARTY,
};
use relay_server::infrastructure::network::ws_adapter::{
    WebSocketAcceptor, INVALID_MESSAGE_FORMAT, SERVER_SHUTTING_DOWN,
};
use relay_server::infrastructure::network::ConnectionSettings;
use relay_server::infrastructure::storage::audit::TracingAuditStore;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WebPeer = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STEP: Duration = Duration::from_secs(5);

// ── Harness ───────────────────────────────────────────────────────────────────

struct TestServer {
    client_addr: SocketAddr,
    supervisor_addr: SocketAddr,
    websocket_addr: SocketAddr,
    router: Arc<MessageRouter>,
    running: Arc<AtomicBool>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

async fn start_server() -> TestServer {
    let router = Arc::new(MessageRouter::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(TracingAuditStore),
    ));
    let settings = Arc::new(ConnectionSettings::default());
    let running = Arc::new(AtomicBool::new(true));
    let any_port: SocketAddr = "127.0.0.1:0".parse().expect("addr");

    let client = LegacyAcceptor::bind(any_port, Role::Client).await.expect("bind client");
    let supervisor = LegacyAcceptor::bind(any_port, Role::Supervisor)
        .await
        .expect("bind supervisor");
    let websocket = WebSocketAcceptor::bind(any_port).await.expect("bind websocket");

    let server = TestServer {
        client_addr: client.local_addr().expect("client addr"),
        supervisor_addr: supervisor.local_addr().expect("supervisor addr"),
        websocket_addr: websocket.local_addr().expect("websocket addr"),
        router: Arc::clone(&router),
        running: Arc::clone(&running),
    };

    tokio::spawn(client.run(Arc::clone(&router), Arc::clone(&settings), Arc::clone(&running)));
    tokio::spawn(supervisor.run(Arc::clone(&router), Arc::clone(&settings), Arc::clone(&running)));
    tokio::spawn(websocket.run(router, settings, running));
    server
}

// ── Legacy peer helpers ───────────────────────────────────────────────────────

async fn legacy_join(addr: SocketAddr, name: &str) -> (TcpStream, ConnectionResponse) {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let request = LegacyFrame::ConnectionRequest(ConnectionRequest {
        session_id: None,
        client_name: name.to_string(),
    });
    write_frame(&mut stream, &request).await.expect("send request");
    match next_frame(&mut stream).await {
        LegacyFrame::ConnectionResponse(response) => (stream, response),
        other => panic!("expected ConnectionResponse, got {other:?}"),
    }
}

async fn next_frame(stream: &mut TcpStream) -> LegacyFrame {
    timeout(STEP, read_frame(stream))
        .await
        .expect("timed out waiting for a frame")
        .expect("read frame")
}

async fn next_text(stream: &mut TcpStream) -> TextMessage {
    match next_frame(stream).await {
        LegacyFrame::TextMessage(text) => text,
        other => panic!("expected TextMessage, got {other:?}"),
    }
}

async fn legacy_say(stream: &mut TcpStream, content: &str) {
    let frame = LegacyFrame::TextMessage(TextMessage {
        session_id: String::new(),
        sender: String::new(),
        content: content.to_string(),
        timestamp_us: 0,
    });
    write_frame(stream, &frame).await.expect("send text");
}

// ── WebSocket peer helpers ────────────────────────────────────────────────────

async fn web_join(addr: SocketAddr, role: Role) -> WebPeer {
    let url = format!("ws://{addr}/{role}");
    let (ws, _) = timeout(STEP, connect_async(url))
        .await
        .expect("timed out connecting")
        .expect("WebSocket handshake");
    ws
}

/// Next JSON envelope, skipping control frames. `None` once the server closes.
async fn web_next(ws: &mut WebPeer) -> Option<Message> {
    loop {
        let frame = timeout(STEP, ws.next()).await.expect("timed out waiting for a frame");
        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                return Some(serde_json::from_str(&text).expect("server sent valid JSON"));
            }
            Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn web_say(ws: &mut WebPeer, text: &str) {
    let json = serde_json::json!({ "type": "TEXT", "payload": { "text": text } });
    ws.send(WsMessage::Text(json.to_string())).await.expect("send");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_legacy_pair_relays_and_reports_disconnect() {
    // Arrange
    let server = start_server().await;

    // Act: Ana waits, Bia arrives and pairs with her
    let (mut ana, waiting) = legacy_join(server.client_addr, "Ana").await;
    let (mut bia, paired) = legacy_join(server.supervisor_addr, "Bia").await;

    // Assert: both handshakes succeed and name the same session
    assert!(waiting.success);
    assert_eq!(waiting.reason, WAITING_FOR_OTHER_PARTY);
    assert!(paired.success);
    assert_eq!(paired.reason, PAIRED_WITH_OTHER_PARTY);
    assert_eq!(waiting.session_id, paired.session_id);

    for peer in [&mut ana, &mut bia] {
        let announcement = next_text(peer).await;
        assert_eq!(announcement.sender, SERVER_SENDER);
        assert_eq!(announcement.content, SESSION_PAIRED);
    }

    // Act: Ana says "oi"
    legacy_say(&mut ana, "oi").await;

    // Assert: Bia receives it attributed to Ana, stamped with the session
    let relayed = next_text(&mut bia).await;
    assert_eq!(relayed.sender, "Ana");
    assert_eq!(relayed.content, "oi");
    assert_eq!(relayed.session_id, paired.session_id);
    assert!(relayed.timestamp_us > 0);

    // Act: Bia hangs up
    drop(bia);

    // Assert: Ana is told once, then the session is gone
    let notice = next_text(&mut ana).await;
    assert_eq!(notice.sender, SERVER_SENDER);
    assert_eq!(notice.content, OTHER_PARTY_DISCONNECTED);
    assert_eq!(server.router.registry().session_count(), 0);
}

#[tokio::test]
async fn test_web_supervisor_pairs_with_legacy_client() {
    // Arrange
    let server = start_server().await;
    let (mut ana, _) = legacy_join(server.client_addr, "Ana").await;

    // Act
    let mut web = web_join(server.websocket_addr, Role::Supervisor).await;

    // Assert: both sides hear about the pairing
    assert_eq!(next_text(&mut ana).await.content, SESSION_PAIRED);
    let announcement = web_next(&mut web).await.expect("announcement");
    assert_eq!(announcement.message_type, MessageType::Text);
    assert_eq!(announcement.text_content(), Some(SESSION_PAIRED));

    // Act / Assert: legacy → web
    legacy_say(&mut ana, "oi").await;
    let relayed = web_next(&mut web).await.expect("relayed");
    assert_eq!(relayed.from, "Ana");
    assert_eq!(relayed.text_content(), Some("oi"));
    assert!(relayed.session_id.is_some());

    // Act / Assert: web → legacy, sender labelled with role and peer address
    web_say(&mut web, "tudo bem?").await;
    let reply = next_text(&mut ana).await;
    assert_eq!(reply.content, "tudo bem?");
    assert!(reply.sender.starts_with("supervisor@127.0.0.1:"), "sender was {}", reply.sender);

    // Act / Assert: web side closes, legacy side is notified
    web.close(None).await.expect("close");
    assert_eq!(next_text(&mut ana).await.content, OTHER_PARTY_DISCONNECTED);
}

#[tokio::test]
async fn test_web_client_waits_and_gets_error_for_garbage() {
    // Arrange
    let server = start_server().await;
    let mut web = web_join(server.websocket_addr, Role::Client).await;

    // Assert: unpaired joiner is told to wait
    let waiting = web_next(&mut web).await.expect("waiting notice");
    assert_eq!(waiting.from, SERVER_SENDER);
    assert_eq!(waiting.text_content(), Some(WAITING_FOR_OTHER_PARTY));

    // Act
    web.send(WsMessage::Text("not json".to_string())).await.expect("send");

    // Assert
    let error = web_next(&mut web).await.expect("error reply");
    assert_eq!(error.message_type, MessageType::Error);
    assert_eq!(error.notice(), Some(INVALID_MESSAGE_FORMAT));
    assert_eq!(server.router.registry().waiting(Role::Client), 1);
}

#[tokio::test]
async fn test_unknown_websocket_path_is_rejected() {
    let server = start_server().await;

    let result = connect_async(format!("ws://{}/lobby", server.websocket_addr)).await;

    assert!(result.is_err());
    assert_eq!(server.router.registry().connection_count(), 0);
}

#[tokio::test]
async fn test_shutdown_notifies_every_transport() {
    // Arrange: one waiting peer on each transport
    let server = start_server().await;
    let (mut ana, _) = legacy_join(server.client_addr, "Ana").await;
    let mut web = web_join(server.websocket_addr, Role::Client).await;
    assert_eq!(
        web_next(&mut web).await.and_then(|m| m.text_content().map(str::to_owned)),
        Some(WAITING_FOR_OTHER_PARTY.to_string())
    );

    // Act
    let announced = server.router.shutdown();

    // Assert
    assert_eq!(announced, 2);
    assert_eq!(next_frame(&mut ana).await, LegacyFrame::ShutdownNotice);
    assert!(matches!(
        timeout(STEP, read_frame(&mut ana)).await,
        Ok(Err(FrameError::Closed))
    ));

    let goodbye = web_next(&mut web).await.expect("disconnect envelope");
    assert_eq!(goodbye.message_type, MessageType::Disconnect);
    assert_eq!(goodbye.notice(), Some(SERVER_SHUTTING_DOWN));
    assert!(web_next(&mut web).await.is_none());
}
