//! Core blockchain components
//!
//! This module contains the pieces the networking layer consumes:
//! - Node identities (fixed-width peer ids)
//! - Blocks (signed, opaque to the wire protocol)
//! - Blockchain (accepts gossiped blocks, tracks pending local blocks)

pub mod block;
pub mod blockchain;
pub mod identity;

pub use block::{Block, BlockError};
pub use blockchain::{BlockChain, BlockchainError};
pub use identity::{NodeId, NODE_ID_LEN};
