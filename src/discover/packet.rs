//! Discovery wire codec
//!
//! A packet is `[type: 1 byte][sender id: 16 bytes][json payload]`.

use crate::core::{NodeId, NODE_ID_LEN};
use crate::discover::error::DiscoveryError;
use crate::discover::node::{Endpoint, Node};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifetime stamped on every outgoing packet
pub const EXPIRATION: Duration = Duration::from_secs(30);

/// Type byte plus sender id
pub const HEADER_LEN: usize = 1 + NODE_ID_LEN;

/// Largest datagram the transport reads
pub const MAX_PACKET_SIZE: usize = 2048;

/// Discovery packet type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Ping = 1,
    Pong = 2,
    FindNode = 3,
    ReplyNode = 4,
}

impl PacketKind {
    pub fn name(&self) -> &'static str {
        match self {
            PacketKind::Ping => "ping",
            PacketKind::Pong => "pong",
            PacketKind::FindNode => "findnode",
            PacketKind::ReplyNode => "replynode",
        }
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = DiscoveryError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketKind::Ping),
            2 => Ok(PacketKind::Pong),
            3 => Ok(PacketKind::FindNode),
            4 => Ok(PacketKind::ReplyNode),
            other => Err(DiscoveryError::MalformedPacket(format!(
                "unknown packet type {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub from: Endpoint,
    pub to: Endpoint,
    pub expire: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub to: Endpoint,
    pub expire: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindNode {
    pub from_id: NodeId,
    pub expire: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyNode {
    pub nodes: Vec<Node>,
    pub expire: i64,
}

/// A decoded discovery packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Ping(Ping),
    Pong(Pong),
    FindNode(FindNode),
    ReplyNode(ReplyNode),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Ping(_) => PacketKind::Ping,
            Packet::Pong(_) => PacketKind::Pong,
            Packet::FindNode(_) => PacketKind::FindNode,
            Packet::ReplyNode(_) => PacketKind::ReplyNode,
        }
    }

    pub fn expire(&self) -> i64 {
        match self {
            Packet::Ping(p) => p.expire,
            Packet::Pong(p) => p.expire,
            Packet::FindNode(p) => p.expire,
            Packet::ReplyNode(p) => p.expire,
        }
    }

    /// Whether the packet's expiry timestamp lies in the past
    pub fn is_expired(&self) -> bool {
        self.expire() < Utc::now().timestamp()
    }
}

/// Expiry timestamp (unix seconds) for a packet sent now
pub fn expiration() -> i64 {
    Utc::now().timestamp() + EXPIRATION.as_secs() as i64
}

/// Encode a packet with the sender id
pub fn encode_packet(id: &NodeId, packet: &Packet) -> Result<Vec<u8>, DiscoveryError> {
    let payload = match packet {
        Packet::Ping(p) => serde_json::to_vec(p),
        Packet::Pong(p) => serde_json::to_vec(p),
        Packet::FindNode(p) => serde_json::to_vec(p),
        Packet::ReplyNode(p) => serde_json::to_vec(p),
    }
    .map_err(|e| DiscoveryError::MalformedPacket(e.to_string()))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(packet.kind() as u8);
    buf.extend_from_slice(id.as_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a packet, returning it with the sender id
pub fn decode_packet(buf: &[u8]) -> Result<(Packet, NodeId), DiscoveryError> {
    if buf.len() < HEADER_LEN {
        return Err(DiscoveryError::MalformedPacket(format!(
            "packet too short: {} bytes",
            buf.len()
        )));
    }

    let kind = PacketKind::try_from(buf[0])?;
    let sender = NodeId::from_slice(&buf[1..HEADER_LEN])
        .ok_or_else(|| DiscoveryError::MalformedPacket("bad sender id".to_string()))?;
    let payload = &buf[HEADER_LEN..];

    let malformed = |e: serde_json::Error| {
        DiscoveryError::MalformedPacket(format!("{} payload: {e}", kind.name()))
    };
    let packet = match kind {
        PacketKind::Ping => Packet::Ping(serde_json::from_slice(payload).map_err(malformed)?),
        PacketKind::Pong => Packet::Pong(serde_json::from_slice(payload).map_err(malformed)?),
        PacketKind::FindNode => {
            Packet::FindNode(serde_json::from_slice(payload).map_err(malformed)?)
        }
        PacketKind::ReplyNode => {
            Packet::ReplyNode(serde_json::from_slice(payload).map_err(malformed)?)
        }
    };

    Ok((packet, sender))
}
