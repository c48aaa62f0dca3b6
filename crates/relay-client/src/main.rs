//! Chat relay console client.
//!
//! Connects to the relay's legacy socket port, then runs two tasks:
//!
//! ```text
//! stdin lines ──► RelaySender ──TextMessage──► relay
//! relay ──frames──► run_listener ──► ConsoleDisplay (stdout)
//! ```
//!
//! Exit codes: `0` after a ShutdownNotice or `/quit`, `1` when the connection
//! fails or is lost.
//!
//! # Usage
//!
//! ```text
//! relay-client --name Ana [--host 127.0.0.1] [--port 5000] [--session-id ID]
//! ```
//!
//! Use `--port 5001` (the default supervisor port) to join as a supervisor.

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use relay_client::application::listener::run_listener;
use relay_client::infrastructure::console::ConsoleDisplay;
use relay_client::infrastructure::network::{RelayLink, RelaySender};

const QUIT_COMMAND: &str = "/quit";

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "relay-client", about = "Console peer for the chat relay", version)]
struct Cli {
    /// Relay host name or IP address.
    #[arg(long, default_value = "127.0.0.1", env = "RELAY_HOST")]
    host: String,

    /// Relay port: the client port or the supervisor port.
    #[arg(long, default_value_t = 5000, env = "RELAY_PORT")]
    port: u16,

    /// Name shown to the other party.
    #[arg(long, env = "RELAY_NAME")]
    name: String,

    /// Session id to ask for.  The relay may assign a different one.
    #[arg(long)]
    session_id: Option<String>,
}

impl Cli {
    fn relay_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout is the chat window, so logs go to stderr and default to `warn`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

/// Connects, then relays until the listener stops or the user quits.
/// Returns the process exit code.
async fn run(cli: &Cli) -> anyhow::Result<i32> {
    let addr = cli.relay_addr();
    let link = RelayLink::connect(&addr, &cli.name, cli.session_id.clone())
        .await
        .with_context(|| format!("could not join the relay at {addr}"))?;
    eprintln!(
        "connected to {addr} (session {}): {}",
        link.response().session_id,
        link.response().reason
    );

    let (mut reader, sender) = link.into_split();
    let (quit_tx, quit_rx) = oneshot::channel();
    tokio::spawn(forward_stdin(sender, quit_tx));

    let mut display = ConsoleDisplay;
    let code = tokio::select! {
        exit = run_listener(&mut reader, &mut display) => exit.exit_code(),
        Ok(()) = quit_rx => 0,
    };
    Ok(code)
}

/// Sends stdin lines until `/quit`, end of input, or a write failure.
///
/// `quit` fires only when the user asked to leave; a write failure is left
/// for the listener to report as a lost connection.
async fn forward_stdin<W>(mut sender: RelaySender<W>, quit: oneshot::Sender<()>)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("could not read stdin: {e}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == QUIT_COMMAND {
            break;
        }
        if let Err(e) = sender.send_text(line).await {
            debug!("send failed: {e}");
            return;
        }
    }

    if let Err(e) = sender.close().await {
        debug!("close failed: {e}");
    }
    let _ = quit.send(());
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["relay-client", "--name", "Ana"]);

        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.port, 5000);
        assert_eq!(cli.name, "Ana");
        assert_eq!(cli.session_id, None);
        assert_eq!(cli.relay_addr(), "127.0.0.1:5000");
    }

    #[test]
    fn test_cli_supervisor_port_and_session() {
        let cli = Cli::parse_from([
            "relay-client",
            "--name",
            "Bia",
            "--port",
            "5001",
            "--session-id",
            "abc",
        ]);

        assert_eq!(cli.relay_addr(), "127.0.0.1:5001");
        assert_eq!(cli.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_cli_rejects_invalid_port() {
        let result = Cli::try_parse_from(["relay-client", "--name", "Ana", "--port", "99999"]);
        assert!(result.is_err());
    }
}
