//! Node configuration
//!
//! The static node set (ids and TCP addresses of every block producer) and
//! the gossip/discovery tunables are read from a TOML file:
//!
//! ```toml
//! produce_block_slot = 5
//! produce_blocks_by_turn = 1
//!
//! [[nodes]]
//! index = 0
//! id = "node0"
//! addr = "127.0.0.1:9000"
//! key = "<hex secp256k1 secret key>"   # optional, random when absent
//!
//! [discovery]
//! id = "node0"
//! listen_addr = "0.0.0.0:30300"
//! bootstrap = ["127.0.0.1:30301"]
//! ```

use crate::core::NodeId;
use crate::crypto::KeyPair;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Node index {0} out of range ({1} nodes configured)")]
    InvalidIndex(usize, usize),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid signing key for node {0}")]
    InvalidKey(String),
}

/// One statically configured peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub index: usize,
    pub id: String,
    pub addr: String,
    /// Hex-encoded block signing key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl NodeInfo {
    pub fn node_id(&self) -> NodeId {
        NodeId::from_str_lossy(&self.id)
    }

    /// Resolve the configured TCP address
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve(&self.addr)
    }

    /// The configured signing key, or a fresh one when none is set
    pub fn key_pair(&self) -> Result<KeyPair, ConfigError> {
        match &self.key {
            Some(key) => KeyPair::from_private_key_hex(key)
                .map_err(|_| ConfigError::InvalidKey(self.id.clone())),
            None => Ok(KeyPair::generate()),
        }
    }
}

/// Discovery transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Local node id
    pub id: String,
    /// UDP listen address
    pub listen_addr: String,
    /// Peers pinged and queried at startup
    #[serde(default)]
    pub bootstrap: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            id: "node".to_string(),
            listen_addr: "0.0.0.0:30300".to_string(),
            bootstrap: Vec::new(),
        }
    }
}

fn default_produce_block_slot() -> u64 {
    10
}

fn default_produce_blocks_by_turn() -> u64 {
    1
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_dial_retry_delay_ms() -> u64 {
    1000
}

/// The full node set configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSetConfig {
    /// Seconds between produced blocks
    #[serde(default = "default_produce_block_slot")]
    pub produce_block_slot: u64,
    /// Consecutive blocks per producer turn (used by the turn scheduler)
    #[serde(default = "default_produce_blocks_by_turn")]
    pub produce_blocks_by_turn: u64,
    /// Seconds between heartbeats on outbound links
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Milliseconds between outbound dial attempts
    #[serde(default = "default_dial_retry_delay_ms")]
    pub dial_retry_delay_ms: u64,
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
    #[serde(default)]
    pub discovery: Option<DiscoveryConfig>,
}

impl Default for NodeSetConfig {
    fn default() -> Self {
        Self {
            produce_block_slot: default_produce_block_slot(),
            produce_blocks_by_turn: default_produce_blocks_by_turn(),
            heartbeat_interval: default_heartbeat_interval(),
            dial_retry_delay_ms: default_dial_retry_delay_ms(),
            nodes: Vec::new(),
            discovery: None,
        }
    }
}

impl NodeSetConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&data)?;
        log::info!(
            "Loaded config from {} ({} nodes)",
            path.as_ref().display(),
            config.nodes.len()
        );
        Ok(config)
    }

    pub fn from_toml_str(data: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(data)?)
    }

    /// The node entry at a given position in the node list
    pub fn node(&self, index: usize) -> Result<&NodeInfo, ConfigError> {
        self.nodes
            .get(index)
            .ok_or(ConfigError::InvalidIndex(index, self.nodes.len()))
    }

    pub fn produce_block_slot(&self) -> Duration {
        Duration::from_secs(self.produce_block_slot.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval.max(1))
    }

    pub fn dial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.dial_retry_delay_ms)
    }
}

/// Resolve a `host:port` string to its first socket address
pub fn resolve(addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.to_socket_addrs()
        .map_err(|e| ConfigError::InvalidAddress(format!("{addr}: {e}")))?
        .next()
        .ok_or_else(|| ConfigError::InvalidAddress(addr.to_string()))
}
