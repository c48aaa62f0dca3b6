//! Chat relay server entry point.
//!
//! Loads the TOML config, applies command-line overrides, and starts one
//! accept loop per listener:
//!
//! ```text
//! main()
//!  ├─ LegacyAcceptor (client port)      ─┐
//!  ├─ LegacyAcceptor (supervisor port)  ─┼─► MessageRouter ─► SessionRegistry
//!  └─ WebSocketAcceptor (optional)      ─┘
//! ```
//!
//! Ctrl+C stops the accept loops, tells every connected peer the server is
//! going away, and exits with status 0.
//!
//! # Usage
//!
//! ```text
//! relay-server [OPTIONS]
//!
//! Options:
//!   --config          <PATH>  TOML config file [default: relay.toml]
//!   --bind            <IP>    Override network.bind_address
//!   --client-port     <PORT>  Override network.client_port
//!   --supervisor-port <PORT>  Override network.supervisor_port
//!   --ws-port         <PORT>  Override network.websocket_port (0 disables)
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use relay_core::Role;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relay_server::application::message_router::MessageRouter;
use relay_server::application::session_registry::SessionRegistry;
use relay_server::infrastructure::network::legacy_listener::LegacyAcceptor;
use relay_server::infrastructure::network::ws_adapter::WebSocketAcceptor;
use relay_server::infrastructure::storage::audit::TracingAuditStore;
use relay_server::infrastructure::storage::config::{load_config, AppConfig};

/// Time given to writer tasks to flush shutdown notices before exit.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Relays chat between paired clients and supervisors over the legacy socket
/// protocol and WebSocket.
#[derive(Debug, Parser)]
#[command(name = "relay-server", version)]
struct Cli {
    /// Path to the TOML config file.  A missing file means "all defaults".
    #[arg(long, default_value = "relay.toml", env = "RELAY_CONFIG")]
    config: PathBuf,

    /// IP address every listener binds to.
    #[arg(long, env = "RELAY_BIND")]
    bind: Option<String>,

    #[arg(long, env = "RELAY_CLIENT_PORT")]
    client_port: Option<u16>,

    #[arg(long, env = "RELAY_SUPERVISOR_PORT")]
    supervisor_port: Option<u16>,

    /// WebSocket port; `0` disables the WebSocket adapter.
    #[arg(long, env = "RELAY_WS_PORT")]
    ws_port: Option<u16>,
}

impl Cli {
    /// Overlays the flags that were given onto `config`.
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(bind) = &self.bind {
            config.network.bind_address = bind.clone();
        }
        if let Some(port) = self.client_port {
            config.network.client_port = port;
        }
        if let Some(port) = self.supervisor_port {
            config.network.supervisor_port = port;
        }
        if let Some(port) = self.ws_port {
            config.network.websocket_port = port;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("could not load {}", cli.config.display()))?;
    cli.apply_overrides(&mut config);
    config.validate().context("refusing to start")?;

    // `RUST_LOG` wins; otherwise the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.relay.log_level)),
        )
        .init();

    info!("chat relay server starting");

    let registry = Arc::new(SessionRegistry::new());
    let router = Arc::new(MessageRouter::new(registry, Arc::new(TracingAuditStore)));
    let settings = Arc::new(config.connection_settings());
    let running = Arc::new(AtomicBool::new(true));

    // ── Listeners ─────────────────────────────────────────────────────────────
    //
    // Every bind happens before any accept loop starts, so a busy port aborts
    // startup instead of leaving a half-running server.
    let client = LegacyAcceptor::bind(config.client_addr()?, Role::Client).await?;
    let supervisor = LegacyAcceptor::bind(config.supervisor_addr()?, Role::Supervisor).await?;
    let websocket = match config.websocket_addr()? {
        Some(addr) => Some(WebSocketAcceptor::bind(addr).await?),
        None => {
            info!("WebSocket adapter disabled");
            None
        }
    };

    let mut loops: Vec<JoinHandle<()>> = vec![
        tokio::spawn(client.run(
            Arc::clone(&router),
            Arc::clone(&settings),
            Arc::clone(&running),
        )),
        tokio::spawn(supervisor.run(
            Arc::clone(&router),
            Arc::clone(&settings),
            Arc::clone(&running),
        )),
    ];
    if let Some(websocket) = websocket {
        loops.push(tokio::spawn(websocket.run(
            Arc::clone(&router),
            Arc::clone(&settings),
            Arc::clone(&running),
        )));
    }

    // ── Graceful shutdown ─────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("received Ctrl+C; shutting down");

    running.store(false, Ordering::Relaxed);
    for handle in loops {
        if let Err(e) = handle.await {
            warn!("accept loop ended abnormally: {e}");
        }
    }

    let announced = router.shutdown();
    info!("shutdown announced to {announced} connection(s)");
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    info!("chat relay server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
