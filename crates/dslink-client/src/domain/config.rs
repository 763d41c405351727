//! Link and transport configuration.
//!
//! [`TransportConfig`] is the runtime struct the transport adapter consumes.
//! [`LinkConfig`] is the on-disk / command-line schema: every field is
//! optional in TOML and falls back to a sensible default, so an empty file
//! is a valid configuration.
//!
//! ```toml
//! broker_url = "wss://broker.example.com:8443/ws?format=msgpack"
//! reconnect_interval_secs = 10
//! log_level = "debug"
//!
//! [transport]
//! handshake_timeout_secs = 5
//! write_high_water_mark = 262144
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings consumed by the WebSocket transport adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Upper bound on TCP connect + TLS + WebSocket upgrade.  Expiry fails the
    /// connect with a timeout cause.
    pub handshake_timeout: Duration,

    /// Largest inbound message accepted by the WebSocket layer, in bytes.
    pub max_message_size: usize,

    /// Queued outgoing bytes above which the writer reports itself as not
    /// writable.  Writes are still accepted past this point.
    pub write_high_water_mark: usize,

    /// Set `TCP_NODELAY` on the socket.
    pub disable_nagle: bool,
}

impl Default for TransportConfig {
    /// | Field                 | Default    |
    /// |-----------------------|------------|
    /// | handshake_timeout     | 10 seconds |
    /// | max_message_size      | 16 MiB     |
    /// | write_high_water_mark | 1 MiB      |
    /// | disable_nagle         | `true`     |
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            max_message_size: 16 << 20,
            write_high_water_mark: 1 << 20,
            disable_nagle: true,
        }
    }
}

/// `[transport]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSection {
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_write_high_water_mark")]
    pub write_high_water_mark: usize,
    #[serde(default = "default_true")]
    pub disable_nagle: bool,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout_secs(),
            max_message_size: default_max_message_size(),
            write_high_water_mark: default_write_high_water_mark(),
            disable_nagle: true,
        }
    }
}

/// Top-level link configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// `ws://` or `wss://` URL of the broker's WebSocket endpoint.  A
    /// `format=msgpack` query parameter selects the binary wire format.
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Overrides the format negotiated from the URL (`"json"` / `"msgpack"`).
    #[serde(default)]
    pub format: Option<String>,

    /// Pause between a lost connection and the next attempt.
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub transport: TransportSection,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            format: None,
            reconnect_interval_secs: default_reconnect_interval_secs(),
            log_level: default_log_level(),
            transport: TransportSection::default(),
        }
    }
}

impl LinkConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on invalid TOML or mistyped fields.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    /// The runtime transport settings described by the `[transport]` table.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            handshake_timeout: Duration::from_secs(self.transport.handshake_timeout_secs),
            max_message_size: self.transport.max_message_size,
            write_high_water_mark: self.transport.write_high_water_mark,
            disable_nagle: self.transport.disable_nagle,
        }
    }
}

// ── Default value functions (required by serde) ───────────────────────────────

fn default_broker_url() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_reconnect_interval_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_max_message_size() -> usize {
    16 << 20
}

fn default_write_high_water_mark() -> usize {
    1 << 20
}

fn default_true() -> bool {
    true
}

// ── Tests ─────────────────────────────────────────────────────────────────────
