//! TOML configuration for the relay server.
//!
//! The file is optional.  Every key has a default, so a missing file, an
//! empty file, or a file written for an older release all load cleanly:
//!
//! ```toml
//! [network]
//! bind_address = "0.0.0.0"
//! client_port = 5000
//! supervisor_port = 5001
//! websocket_port = 8080   # 0 disables the WebSocket adapter
//!
//! [relay]
//! write_timeout_ms = 5000
//! handshake_timeout_ms = 30000
//! outbound_queue_capacity = 256
//! log_level = "info"
//! ```
//!
//! Call [`AppConfig::validate`] after applying command-line overrides; a
//! config that fails validation must stop the process before any listener
//! is bound.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::ConnectionSettings;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error other than "not found".
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values parsed but cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub relay: RelaySettings,
}

/// Listener addresses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// IP address all listeners bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Legacy socket port for clients.
    #[serde(default = "default_client_port")]
    pub client_port: u16,
    /// Legacy socket port for supervisors.
    #[serde(default = "default_supervisor_port")]
    pub supervisor_port: u16,
    /// WebSocket port; `0` disables the adapter.
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,
}

/// Per-connection limits and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelaySettings {
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_client_port() -> u16 {
    5000
}
fn default_supervisor_port() -> u16 {
    5001
}
fn default_websocket_port() -> u16 {
    8080
}
fn default_write_timeout_ms() -> u64 {
    5_000
}
fn default_handshake_timeout_ms() -> u64 {
    30_000
}
fn default_outbound_queue_capacity() -> usize {
    256
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            client_port: default_client_port(),
            supervisor_port: default_supervisor_port(),
            websocket_port: default_websocket_port(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Checks that the config can be used to start the server.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero or duplicate port, a bind
    /// address that is not an IP address, or a zero queue capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let network = &self.network;
        self.bind_ip()?;

        if network.client_port == 0 || network.supervisor_port == 0 {
            return Err(ConfigError::Invalid(
                "client_port and supervisor_port must be non-zero".to_string(),
            ));
        }
        if network.client_port == network.supervisor_port {
            return Err(ConfigError::Invalid(format!(
                "client_port and supervisor_port are both {}",
                network.client_port
            )));
        }
        if network.websocket_port != 0
            && (network.websocket_port == network.client_port
                || network.websocket_port == network.supervisor_port)
        {
            return Err(ConfigError::Invalid(format!(
                "websocket_port {} collides with a legacy port",
                network.websocket_port
            )));
        }
        if self.relay.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "outbound_queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn client_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.network.client_port))
    }

    pub fn supervisor_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.network.supervisor_port))
    }

    /// `None` when the WebSocket adapter is disabled.
    pub fn websocket_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        if self.network.websocket_port == 0 {
            return Ok(None);
        }
        Ok(Some(SocketAddr::new(self.bind_ip()?, self.network.websocket_port)))
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            write_timeout: Duration::from_millis(self.relay.write_timeout_ms),
            handshake_timeout: Duration::from_millis(self.relay.handshake_timeout_ms),
            outbound_queue_capacity: self.relay.outbound_queue_capacity,
        }
    }

    fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.network.bind_address.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "bind_address {:?} is not an IP address",
                self.network.bind_address
            ))
        })
    }
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
