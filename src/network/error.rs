use crate::config::ConfigError;
use crate::core::BlockError;
use thiserror::Error;

/// Gossip networking errors
#[derive(Error, Debug)]
pub enum GossipError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Socket error: {0}")]
    SocketError(#[from] std::io::Error),
    #[error("Block error: {0}")]
    Block(#[from] BlockError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}
