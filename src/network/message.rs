//! Gossip message types
//!
//! Every TCP message is a `{msg_type, id, data}` record: the type tag, the
//! sender identity and an opaque payload (an encoded block for `BlockData`).

use crate::core::NodeId;
use crate::network::error::GossipError;
use serde::{Deserialize, Serialize};

/// Gossip message type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum MsgType {
    /// Ask the peer for its identity (handshake initiator)
    IdentityRequest = 1,
    /// Identity answer (handshake responder)
    IdentityResponse = 2,
    /// Liveness signal, no payload
    HeartBeat = 3,
    /// An encoded block
    BlockData = 4,
}

impl From<MsgType> for u8 {
    fn from(t: MsgType) -> u8 {
        t as u8
    }
}

impl TryFrom<u8> for MsgType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MsgType::IdentityRequest),
            2 => Ok(MsgType::IdentityResponse),
            3 => Ok(MsgType::HeartBeat),
            4 => Ok(MsgType::BlockData),
            other => Err(format!("unknown message type {other}")),
        }
    }
}

/// A framed application message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipMessage {
    pub msg_type: MsgType,
    pub id: NodeId,
    #[serde(with = "hex_data", default)]
    pub data: Vec<u8>,
}

impl GossipMessage {
    pub fn new(msg_type: MsgType, id: NodeId, data: Vec<u8>) -> Self {
        Self { msg_type, id, data }
    }

    pub fn identity_request(id: NodeId) -> Self {
        Self::new(MsgType::IdentityRequest, id, Vec::new())
    }

    pub fn identity_response(id: NodeId) -> Self {
        Self::new(MsgType::IdentityResponse, id, Vec::new())
    }

    pub fn heartbeat(id: NodeId) -> Self {
        Self::new(MsgType::HeartBeat, id, Vec::new())
    }

    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, GossipError> {
        serde_json::to_vec(self).map_err(|e| GossipError::MalformedMessage(e.to_string()))
    }

    /// Deserialize message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, GossipError> {
        serde_json::from_slice(data).map_err(|e| GossipError::MalformedMessage(e.to_string()))
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self.msg_type {
            MsgType::IdentityRequest => "IdentityRequest",
            MsgType::IdentityResponse => "IdentityResponse",
            MsgType::HeartBeat => "HeartBeat",
            MsgType::BlockData => "BlockData",
        }
    }
}

mod hex_data {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let msg = GossipMessage::new(MsgType::BlockData, NodeId::from("n1"), vec![1, 2, 3]);
        let bytes = msg.to_bytes().unwrap();
        let decoded = GossipMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.type_name(), "BlockData");
    }

    #[test]
    fn test_type_tag_on_wire() {
        let msg = GossipMessage::identity_request(NodeId::from("n1"));
        let json: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(json["msg_type"], 1);
        assert_eq!(json["data"], "");
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let raw = format!(
            "{{\"msg_type\":9,\"id\":\"{}\",\"data\":\"\"}}",
            hex::encode(NodeId::from("n1").0)
        );
        assert!(matches!(
            GossipMessage::from_bytes(raw.as_bytes()),
            Err(GossipError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            GossipMessage::from_bytes(b"\x00\x01"),
            Err(GossipError::MalformedMessage(_))
        ));
    }
}
