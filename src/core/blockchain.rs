//! Blockchain implementation
//!
//! An in-memory chain that accepts gossiped blocks and tracks locally
//! produced blocks that are still awaiting confirmation.

use crate::core::block::{Block, BlockError};
use thiserror::Error;

/// Most locally produced blocks kept awaiting confirmation
pub const MAX_PENDING: usize = 64;

/// Blockchain-related errors
#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("Invalid block: {0}")]
    InvalidBlock(#[from] BlockError),
    #[error("Duplicate block: {0}")]
    DuplicateBlock(String),
}

/// The main blockchain structure
#[derive(Debug, Clone)]
pub struct BlockChain {
    /// Accepted blocks, genesis first
    blocks: Vec<Block>,
    /// Locally produced blocks awaiting confirmation
    pending: Vec<Block>,
}

impl Default for BlockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockChain {
    /// Create a new blockchain with genesis block
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::genesis()],
            pending: Vec::new(),
        }
    }

    /// Validate and append a block received from the network
    pub fn add(&mut self, block: Block) -> Result<(), BlockchainError> {
        if !block.is_valid_hash() {
            return Err(BlockError::InvalidBlockHash.into());
        }
        block.verify_signature()?;

        if self.contains(&block.hash) {
            return Err(BlockchainError::DuplicateBlock(block.hash));
        }

        // anything at or below the accepted height is superseded
        self.pending
            .retain(|p| p.hash != block.hash && p.index > block.index);
        log::info!(
            "Accepted block {} (index {}) from {}",
            &block.hash[..16],
            block.index,
            block.producer
        );
        self.blocks.push(block);
        Ok(())
    }

    /// Record a locally produced block as pending
    pub fn pending(&mut self, block: Block) {
        if self.pending.iter().any(|p| p.hash == block.hash) {
            return;
        }
        log::debug!("Block {} pending", block.index);
        self.pending.push(block);
        if self.pending.len() > MAX_PENDING {
            let excess = self.pending.len() - MAX_PENDING;
            self.pending.drain(..excess);
        }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.blocks.iter().any(|b| b.hash == hash)
    }

    /// Get the latest accepted block
    pub fn latest_block(&self) -> &Block {
        // The chain is created with genesis and never shrinks.
        &self.blocks[self.blocks.len() - 1]
    }

    /// Hash the next produced block should link to: the newest pending block
    /// if any, else the chain tip
    pub fn latest_hash(&self) -> String {
        self.pending
            .last()
            .map(|b| b.hash.clone())
            .unwrap_or_else(|| self.latest_block().hash.clone())
    }

    /// Index the next produced block should carry
    pub fn next_index(&self) -> u64 {
        let tip = self.latest_block().index;
        let pending_tip = self.pending.last().map(|b| b.index).unwrap_or(0);
        tip.max(pending_tip) + 1
    }

    /// Get blockchain height
    pub fn height(&self) -> u64 {
        self.blocks.len() as u64 - 1
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identity::NodeId;
    use crate::crypto::KeyPair;

    fn signed_block(index: u64, previous_hash: String) -> Block {
        let mut block = Block::new(index, previous_hash, NodeId::from("n1"));
        block.sign_block(&KeyPair::generate()).unwrap();
        block
    }

    #[test]
    fn test_new_chain_has_genesis() {
        let chain = BlockChain::new();
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.latest_block().hash, Block::genesis().hash);
    }

    #[test]
    fn test_add_valid_block() {
        let mut chain = BlockChain::new();
        let block = signed_block(1, chain.latest_hash());
        chain.add(block.clone()).unwrap();

        assert_eq!(chain.height(), 1);
        assert!(chain.contains(&block.hash));
    }

    #[test]
    fn test_add_rejects_unsigned() {
        let mut chain = BlockChain::new();
        let block = Block::new(1, chain.latest_hash(), NodeId::from("n1"));
        assert!(matches!(
            chain.add(block),
            Err(BlockchainError::InvalidBlock(BlockError::Unsigned))
        ));
    }

    #[test]
    fn test_add_rejects_duplicate() {
        let mut chain = BlockChain::new();
        let block = signed_block(1, chain.latest_hash());
        chain.add(block.clone()).unwrap();
        assert!(matches!(
            chain.add(block),
            Err(BlockchainError::DuplicateBlock(_))
        ));
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn test_pending_then_confirmed() {
        let mut chain = BlockChain::new();
        let block = signed_block(chain.next_index(), chain.latest_hash());

        chain.pending(block.clone());
        chain.pending(block.clone());
        assert_eq!(chain.pending_len(), 1);
        assert_eq!(chain.latest_hash(), block.hash);
        assert_eq!(chain.next_index(), 2);

        chain.add(block).unwrap();
        assert_eq!(chain.pending_len(), 0);
    }

    #[test]
    fn test_pending_is_bounded() {
        let mut chain = BlockChain::new();
        for _ in 0..500 {
            let block = Block::new(chain.next_index(), chain.latest_hash(), NodeId::from("n1"));
            chain.pending(block);
        }
        assert_eq!(chain.pending_len(), MAX_PENDING);
        // production keeps extending the newest pending block
        assert_eq!(chain.next_index(), 501);
    }

    #[test]
    fn test_accepted_block_prunes_older_pending() {
        let mut chain = BlockChain::new();
        let ours = Block::new(chain.next_index(), chain.latest_hash(), NodeId::from("n1"));
        chain.pending(ours.clone());

        let mut theirs = Block::new(1, Block::genesis().hash, NodeId::from("n2"));
        theirs.sign_block(&KeyPair::generate()).unwrap();
        chain.add(theirs).unwrap();

        assert_eq!(chain.pending_len(), 0);
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.next_index(), 2);
    }
}
