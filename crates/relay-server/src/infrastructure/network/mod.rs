//! Network infrastructure for the relay server.
//!
//! # Sub-modules
//!
//! - **`legacy_conn`** – [`Connection`] handle for legacy socket peers: a
//!   bounded frame queue drained by a writer task.
//!
//! - **`legacy_listener`** – Accept loop for the client and supervisor TCP
//!   ports, and the per-connection handshake + relay handler.
//!
//! - **`ws_adapter`** – WebSocket accept loop, its [`Connection`] handle, and
//!   the JSON relay loop.
//!
//! [`Connection`]: crate::application::connection::Connection

pub mod legacy_conn;
pub mod legacy_listener;
pub mod ws_adapter;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{error, info};

/// How often accept loops wake up to check the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Per-connection limits shared by both transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Longest a single transport write may take before the connection is closed.
    pub write_timeout: Duration,
    /// Longest a new peer may take to complete its handshake.
    pub handshake_timeout: Duration,
    /// Outbound messages buffered per connection before sends fail.
    pub outbound_queue_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(30),
            outbound_queue_capacity: 256,
        }
    }
}

/// Accepts connections on `listener` until `running` is cleared, handing
/// each one to `on_accept`.
///
/// `on_accept` must not block; it is expected to spawn a task.
async fn accept_loop<F>(listener: &TcpListener, label: &str, running: &AtomicBool, mut on_accept: F)
where
    F: FnMut(TcpStream, SocketAddr),
{
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("{label}: shutdown flag set; stopping accept loop");
            break;
        }

        // Short timeout so the flag is re-checked even when nobody connects.
        match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                info!("{label}: new connection from {peer_addr}");
                on_accept(stream, peer_addr);
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g. too many open file descriptors).
                error!("{label}: accept error: {e}");
            }
            Err(_) => {}
        }
    }
}
