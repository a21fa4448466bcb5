//! P2P gossip networking
//!
//! Connects the fixed set of block producers over TCP.
//!
//! # Features
//! - Identity handshake on every link
//! - Inbound and outbound sockets merged per peer
//! - Heartbeats on outbound links
//! - Block broadcast to all connected peers

pub mod broadcast;
pub mod codec;
pub mod error;
pub mod message;
pub mod node;
pub mod pool;

pub use broadcast::Broadcast;
pub use codec::{MessageCodec, MAGIC, MAX_MESSAGE_SIZE};
pub use error::GossipError;
pub use message::{GossipMessage, MsgType};
pub use node::GossipNode;
pub use pool::{ConnectionPool, LogicalConnection, Side};
