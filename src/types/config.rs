//! Configuration structures.
//!
//! Configuration is loaded from an optional JSON file and then overlaid by
//! `VETCLIX_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::types::{Error, Result};

/// Physical channel used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// WebSocket with the `vetclix` sub-protocol, one JSON text frame per envelope.
    #[default]
    WebSocket,
    /// Raw TCP with a 4-byte big-endian length prefix per envelope.
    Tcp,
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            "tcp" => Ok(TransportKind::Tcp),
            other => Err(Error::config(format!("unknown transport: {}", other))),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address (`ws://host[:port]` for WebSocket, `host:port` for TCP).
    pub address: String,

    /// Transport used for the session.
    pub transport: TransportKind,

    /// WebSocket sub-protocol requested during the handshake.
    pub protocol: String,

    /// Default per-call deadline.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// Deadline for the single connection attempt.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Maximum accepted frame size in bytes (TCP framing).
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "ws://localhost".to_string(),
            transport: TransportKind::WebSocket,
            protocol: "vetclix".to_string(),
            call_timeout: Duration::from_millis(5_000),
            connect_timeout: Duration::from_secs(10),
            max_frame_bytes: 5 * 1024 * 1024,
        }
    }
}

impl ClientConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("reading {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("parsing {}: {}", path.display(), e)))
    }

    /// Defaults overlaid by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    /// Overlay `VETCLIX_*` environment variables onto this config.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(address) = lookup("VETCLIX_ADDRESS") {
            self.address = address;
        }
        if let Some(transport) = lookup("VETCLIX_TRANSPORT") {
            self.transport = transport.parse()?;
        }
        if let Some(protocol) = lookup("VETCLIX_PROTOCOL") {
            self.protocol = protocol;
        }
        if let Some(ms) = lookup("VETCLIX_CALL_TIMEOUT_MS") {
            self.call_timeout = Duration::from_millis(parse_number("VETCLIX_CALL_TIMEOUT_MS", &ms)?);
        }
        if let Some(ms) = lookup("VETCLIX_CONNECT_TIMEOUT_MS") {
            self.connect_timeout =
                Duration::from_millis(parse_number("VETCLIX_CONNECT_TIMEOUT_MS", &ms)?);
        }
        if let Some(bytes) = lookup("VETCLIX_MAX_FRAME_BYTES") {
            self.max_frame_bytes = parse_number("VETCLIX_MAX_FRAME_BYTES", &bytes)?;
        }
        Ok(self)
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::config(format!("{} must be a non-negative integer, got {:?}", key, raw)))
}
