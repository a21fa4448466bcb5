//! UDP peer discovery
//!
//! A small request/reply protocol for liveness checks and neighbour lookup:
//! - `ping` / `pong` confirm a peer is reachable
//! - `findnode` / `replynode` exchange routing table entries
//!
//! Replies are correlated with outstanding requests by the pending-request
//! registry, which times every request out after one minute.

pub mod error;
pub mod node;
pub mod packet;
pub mod registry;
pub mod table;
pub mod udp;

pub use error::DiscoveryError;
pub use node::{Endpoint, Node};
pub use packet::{
    decode_packet, encode_packet, FindNode, Packet, PacketKind, Ping, Pong, ReplyNode, EXPIRATION,
    HEADER_LEN, MAX_PACKET_SIZE,
};
pub use registry::{Inbound, MatchFn, PendingHandle, Registry, RegistryHandle, REQUEST_TIMEOUT};
pub use table::{RoutingTable, Table, TABLE_SIZE};
pub use udp::Udp;
