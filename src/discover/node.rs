//! Discovery endpoints and node records

use crate::core::NodeId;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Network address of a peer for discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub udp: u16,
    pub tcp: u16,
}

impl Endpoint {
    pub fn new(ip: IpAddr, udp: u16, tcp: u16) -> Self {
        Self { ip, udp, tcp }
    }

    /// Endpoint of a packet source; the TCP port is assumed equal to UDP.
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port(), addr.port())
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp)
    }
}

/// A peer known to the routing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub ip: IpAddr,
    pub udp: u16,
    pub tcp: u16,
}

impl Node {
    pub fn new(id: NodeId, ip: IpAddr, udp: u16, tcp: u16) -> Self {
        Self { id, ip, udp, tcp }
    }

    /// Whether the record can be dialed at all
    pub fn validate(&self) -> bool {
        !self.id.is_zero() && !self.ip.is_unspecified() && self.udp != 0
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip, self.udp, self.tcp)
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp)
    }
}
