//! Node identity
//!
//! Every node is named by a fixed-width 16-byte identifier. Configured ids are
//! short strings; their UTF-8 bytes are copied in and zero-padded.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Width of a node identifier in bytes
pub const NODE_ID_LEN: usize = 16;

/// Fixed-length unique peer identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub [u8; NODE_ID_LEN]);

impl NodeId {
    /// Build an id from a configured string, truncating past 16 bytes
    pub fn from_str_lossy(s: &str) -> Self {
        let mut id = [0u8; NODE_ID_LEN];
        let bytes = s.as_bytes();
        let n = bytes.len().min(NODE_ID_LEN);
        id[..n].copy_from_slice(&bytes[..n]);
        Self(id)
    }

    /// Build an id from a wire slice. Returns `None` unless exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; NODE_ID_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// XOR distance between two ids, used to rank routing table entries
    pub fn distance(&self, other: &NodeId) -> [u8; NODE_ID_LEN] {
        let mut out = [0u8; NODE_ID_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }

    /// Printable form: the configured string when the id is one, hex otherwise
    fn display_string(&self) -> String {
        let end = self
            .0
            .iter()
            .rposition(|b| *b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        match std::str::from_utf8(&self.0[..end]) {
            Ok(s) if !s.is_empty() && !s.chars().any(char::is_control) => s.to_string(),
            _ => hex::encode(self.0),
        }
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::from_str_lossy(s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_string())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.display_string())
    }
}

// Ids travel as hex inside JSON payloads so non-UTF-8 ids survive intact.
impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        NodeId::from_slice(&bytes)
            .ok_or_else(|| serde::de::Error::custom(format!("node id must be {NODE_ID_LEN} bytes")))
    }
}
