//! Block implementation
//!
//! Blocks are produced by the local producer, signed with the node key and
//! carried opaquely inside gossip `BlockData` messages.

use crate::core::identity::NodeId;
use crate::crypto::{public_key_from_hex, sha256_hex, verify_signature, KeyError, KeyPair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Block validation and codec errors
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Block decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid block hash")]
    InvalidBlockHash,
    #[error("Block is not signed")]
    Unsigned,
    #[error("Invalid block signature")]
    InvalidSignature,
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

/// A block in the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block index/height
    pub index: u64,
    /// Hash of the previous block
    pub previous_hash: String,
    /// Block creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Identity of the producing node
    pub producer: NodeId,
    /// Block hash (cached)
    pub hash: String,
    /// Compact ECDSA signature over the hash, hex encoded
    pub signature: Option<String>,
    /// Producer public key, hex encoded
    pub public_key: Option<String>,
}

impl Block {
    /// Create a new unsigned block
    pub fn new(index: u64, previous_hash: String, producer: NodeId) -> Self {
        let mut block = Self {
            index,
            previous_hash,
            timestamp: Utc::now(),
            producer,
            hash: String::new(),
            signature: None,
            public_key: None,
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Create the genesis block
    pub fn genesis() -> Self {
        let mut block = Self {
            index: 0,
            previous_hash: "0".repeat(64),
            timestamp: DateTime::<Utc>::default(),
            producer: NodeId::default(),
            hash: String::new(),
            signature: None,
            public_key: None,
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Hash of the header fields
    pub fn calculate_hash(&self) -> String {
        let data = format!(
            "{}{}{}{}",
            self.index,
            self.previous_hash,
            self.timestamp.timestamp_millis(),
            hex::encode(self.producer.as_bytes())
        );
        sha256_hex(data.as_bytes())
    }

    pub fn is_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    /// Sign the block hash with the producer key
    pub fn sign_block(&mut self, keys: &KeyPair) -> Result<(), BlockError> {
        let digest = hex::decode(&self.hash).map_err(|_| BlockError::InvalidBlockHash)?;
        let signature = keys.sign(&digest)?;
        self.signature = Some(hex::encode(signature));
        self.public_key = Some(keys.public_key_hex());
        Ok(())
    }

    /// Check the embedded signature against the embedded public key
    pub fn verify_signature(&self) -> Result<(), BlockError> {
        let (Some(signature), Some(public_key)) = (&self.signature, &self.public_key) else {
            return Err(BlockError::Unsigned);
        };
        let digest = hex::decode(&self.hash).map_err(|_| BlockError::InvalidBlockHash)?;
        let signature = hex::decode(signature).map_err(|_| BlockError::InvalidSignature)?;
        let public_key = public_key_from_hex(public_key)?;

        if verify_signature(&public_key, &digest, &signature)? {
            Ok(())
        } else {
            Err(BlockError::InvalidSignature)
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BlockError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, BlockError> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_block_hash_is_valid() {
        let block = Block::new(1, Block::genesis().hash, NodeId::from("n1"));
        assert!(block.is_valid_hash());
        assert_eq!(block.hash.len(), 64);
    }

    #[test]
    fn test_tampered_block_hash_invalid() {
        let mut block = Block::new(1, "00".repeat(32), NodeId::from("n1"));
        block.index = 2;
        assert!(!block.is_valid_hash());
    }

    #[test]
    fn test_genesis_is_deterministic() {
        assert_eq!(Block::genesis().hash, Block::genesis().hash);
    }

    #[test]
    fn test_sign_and_verify() {
        let keys = KeyPair::generate();
        let mut block = Block::new(3, "ab".repeat(32), NodeId::from("n1"));
        assert!(matches!(block.verify_signature(), Err(BlockError::Unsigned)));

        block.sign_block(&keys).unwrap();
        block.verify_signature().unwrap();
    }

    #[test]
    fn test_signature_rejected_after_tampering() {
        let keys = KeyPair::generate();
        let mut block = Block::new(3, "ab".repeat(32), NodeId::from("n1"));
        block.sign_block(&keys).unwrap();

        block.public_key = Some(KeyPair::generate().public_key_hex());
        assert!(matches!(
            block.verify_signature(),
            Err(BlockError::InvalidSignature)
        ));
    }

    #[test]
    fn test_encode_decode() {
        let mut block = Block::new(7, "cd".repeat(32), NodeId::from("n3"));
        block.sign_block(&KeyPair::generate()).unwrap();

        let decoded = Block::decode(&block.encode().unwrap()).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(Block::decode(b"not a block"), Err(BlockError::Decode(_))));
    }
}
