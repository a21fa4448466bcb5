//! Routing table
//!
//! The transport only needs two things from the table: record a candidate
//! peer and list the closest known peers.

use crate::core::NodeId;
use crate::discover::node::Node;
use std::sync::Mutex;

/// Maximum entries kept and returned by [`Table`]
pub const TABLE_SIZE: usize = 16;

/// The routing table contract consumed by the discovery transport
pub trait RoutingTable: Send + Sync {
    /// Record a candidate peer
    fn bond_node(&self, node: Node);

    /// Currently known peers, closest first
    fn closest(&self) -> Vec<Node>;
}

/// In-memory table ordered by XOR distance from the local id
#[derive(Debug)]
pub struct Table {
    self_id: NodeId,
    nodes: Mutex<Vec<Node>>,
}

impl Table {
    pub fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            nodes: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Node>> {
        // The list holds plain values; a poisoned lock leaves it consistent.
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RoutingTable for Table {
    fn bond_node(&self, node: Node) {
        if node.id == self.self_id || !node.validate() {
            log::debug!("Not bonding {:?}", node);
            return;
        }

        let mut nodes = self.lock();
        nodes.retain(|n| n.id != node.id);
        nodes.push(node);
        let self_id = self.self_id;
        nodes.sort_by_key(|n| self_id.distance(&n.id));
        nodes.truncate(TABLE_SIZE);
    }

    fn closest(&self) -> Vec<Node> {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn node(id: [u8; 16], port: u16) -> Node {
        Node::new(NodeId(id), IpAddr::V4(Ipv4Addr::LOCALHOST), port, port)
    }

    #[test]
    fn test_bond_orders_by_distance() {
        let table = Table::new(NodeId([0u8; 16]));
        let mut far = [0u8; 16];
        far[0] = 0x80;
        let mut near = [0u8; 16];
        near[15] = 0x01;

        table.bond_node(node(far, 1));
        table.bond_node(node(near, 2));

        let closest = table.closest();
        assert_eq!(closest.len(), 2);
        assert_eq!(closest[0].id, NodeId(near));
        assert_eq!(closest[1].id, NodeId(far));
    }

    #[test]
    fn test_bond_replaces_same_id() {
        let table = Table::new(NodeId::from("self"));
        table.bond_node(node([3u8; 16], 1));
        table.bond_node(node([3u8; 16], 2));

        let closest = table.closest();
        assert_eq!(closest.len(), 1);
        assert_eq!(closest[0].udp, 2);
    }

    #[test]
    fn test_ignores_self_and_invalid() {
        let self_id = NodeId([5u8; 16]);
        let table = Table::new(self_id);
        table.bond_node(node([5u8; 16], 1));
        table.bond_node(node([6u8; 16], 0));
        assert!(table.is_empty());
    }

    #[test]
    fn test_bounded() {
        let table = Table::new(NodeId([0u8; 16]));
        for i in 1..=(TABLE_SIZE as u8 + 4) {
            let mut id = [0u8; 16];
            id[0] = i;
            table.bond_node(node(id, 1000 + i as u16));
        }
        assert_eq!(table.len(), TABLE_SIZE);
        // the farthest entries were dropped
        assert!(table.closest().iter().all(|n| n.id.0[0] <= TABLE_SIZE as u8));
    }
}
