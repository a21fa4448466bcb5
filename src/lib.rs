//! DPoS P2P: networking core for a small delegated-proof-of-stake node set
//!
//! This crate provides:
//! - UDP peer discovery (ping/pong, findnode/replynode) with a
//!   pending-request registry that correlates replies and times requests out
//! - A TCP gossip layer with an identity handshake, a per-peer connection
//!   pool merging inbound and outbound sockets, and block broadcast
//! - Signed blocks (secp256k1) and a minimal chain that accepts gossiped
//!   blocks and tracks locally produced ones
//! - Slot-based block production
//!
//! # Example
//!
//! ```rust,no_run
//! use dpos_p2p::config::NodeSetConfig;
//! use dpos_p2p::crypto::KeyPair;
//! use dpos_p2p::network::GossipNode;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NodeSetConfig::load("nodes.toml")?;
//! let node = GossipNode::new(0, config, KeyPair::generate())?;
//! node.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod crypto;
pub mod discover;
pub mod mining;
pub mod network;
pub mod util;

// Re-export commonly used types
pub use config::{ConfigError, DiscoveryConfig, NodeInfo, NodeSetConfig};
pub use core::{Block, BlockChain, NodeId};
pub use crypto::KeyPair;
pub use discover::{DiscoveryError, Node, RoutingTable, Table, Udp};
pub use mining::Producer;
pub use network::{ConnectionPool, GossipError, GossipMessage, GossipNode, MsgType};
pub use util::local_ip;
