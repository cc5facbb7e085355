//! Client configuration
//!
//! Every section has sensible defaults, so an empty TOML document is a valid
//! configuration. Durations are written in milliseconds:
//!
//! ```toml
//! [pool]
//! relays = ["wss://relay.damus.io", "wss://nos.lol"]
//! reconnect_base_delay_ms = 500
//!
//! [pool.transport]
//! connect_timeout_ms = 5000
//!
//! [profile]
//! content_limit = 200
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Per-relay WebSocket settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// How long an opening handshake may take
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
    /// How long to wait for a pong
    #[serde(rename = "ping_timeout_ms", with = "duration_ms")]
    pub ping_timeout: Duration,
    /// Capacity of the transport event broadcast channel
    pub event_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(10),
            event_capacity: 1024,
        }
    }
}

/// Relay pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Relays to add at construction
    pub relays: Vec<String>,
    /// First reconnect delay
    #[serde(rename = "reconnect_base_delay_ms", with = "duration_ms")]
    pub reconnect_base_delay: Duration,
    /// Upper bound on a single reconnect delay
    #[serde(rename = "reconnect_max_delay_ms", with = "duration_ms")]
    pub reconnect_max_delay: Duration,
    /// Reconnect attempts before a relay is given up on (0 = infinite)
    pub reconnect_max_attempts: u32,
    /// Capacity of the pool event broadcast channel
    pub event_capacity: usize,
    pub transport: TransportConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
            reconnect_max_attempts: 0,
            event_capacity: 1024,
            transport: TransportConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn with_relays(mut self, relays: Vec<String>) -> Self {
        self.relays = relays;
        self
    }
}

/// Profile aggregator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// `limit` on the timeline subscription
    pub content_limit: u64,
    /// Also request boosts on the timeline subscription
    pub include_boosts_in_content: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            content_limit: 500,
            include_boosts_in_content: false,
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub pool: PoolConfig,
    pub profile: ProfileConfig,
}

impl ClientConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
