//! Peer configuration.
//!
//! [`PeerConfig`] holds every runtime setting of the `st-peer` binary.  It is
//! built in three layers, later layers winning:
//!
//! 1. [`PeerConfig::default`]
//! 2. an optional TOML file (see [`PeerConfig::from_toml_str`])
//! 3. command-line flags and `ST_*` environment variables (see `main.rs`)
//!
//! Every field carries a serde default, so a file only needs the keys it
//! changes:
//!
//! ```toml
//! bind_addr = "0.0.0.0:9300"
//! call_timeout_ms = 5000
//! log_level = "debug"
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to turn configuration text into a [`PeerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// All runtime configuration for `st-peer`.
///
/// # Example
///
/// ```rust
/// use smart_transport_ws::domain::PeerConfig;
///
/// let cfg = PeerConfig::from_toml_str("call_timeout_ms = 250").unwrap();
/// assert_eq!(cfg.call_timeout(), Some(std::time::Duration::from_millis(250)));
/// assert_eq!(cfg.bind_addr.port(), 9300);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Address `st-peer serve` listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// WebSocket URL `st-peer call` connects to.
    #[serde(default = "default_url")]
    pub url: String,

    /// Deadline for `st-peer call`, in milliseconds.  Absent means wait until
    /// the connection closes.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,

    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9300))
}

fn default_url() -> String {
    "ws://127.0.0.1:9300".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PeerConfig {
    /// | Field           | Default               |
    /// |-----------------|-----------------------|
    /// | bind_addr       | `127.0.0.1:9300`      |
    /// | url             | `ws://127.0.0.1:9300` |
    /// | call_timeout_ms | none                  |
    /// | log_level       | `info`                |
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            url: default_url(),
            call_timeout_ms: None,
            log_level: default_log_level(),
        }
    }
}

impl PeerConfig {
    /// Parses TOML text; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// The call deadline as a `Duration`, if one is configured.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
