//! Connection pool
//!
//! Maps each peer identity to one logical connection. A peer may reach us
//! (inbound, the read side) and we may reach it (outbound, the write side);
//! both sockets are merged into the same entry.

use crate::core::NodeId;
use crate::network::message::GossipMessage;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Which socket of a logical connection is being registered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Accepted by us; we read from it
    Inbound,
    /// Dialed by us; we write to it
    Outbound,
}

/// The merged read/write view of one peer
#[derive(Debug, Clone)]
pub struct LogicalConnection {
    pub id: NodeId,
    /// Remote address of the read-side socket
    pub read: Option<SocketAddr>,
    pub readable: bool,
    /// Remote address of the write-side socket
    pub write: Option<SocketAddr>,
    pub writable: bool,
    /// Broadcast subscription feeding the write side
    pub broadcast: mpsc::UnboundedSender<GossipMessage>,
    /// Receiving end of `broadcast`, drained by the outbound task
    pub inbox: Arc<Mutex<mpsc::UnboundedReceiver<GossipMessage>>>,
}

impl LogicalConnection {
    fn new(id: NodeId) -> Self {
        let (broadcast, inbox) = mpsc::unbounded_channel();
        Self {
            id,
            read: None,
            readable: false,
            write: None,
            writable: false,
            broadcast,
            inbox: Arc::new(Mutex::new(inbox)),
        }
    }
}

/// Registry of all logical connections
#[derive(Debug, Default)]
pub struct ConnectionPool {
    set: Mutex<HashMap<NodeId, LogicalConnection>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or create the entry for `id` and attach a socket to `side`
    pub async fn add_or_update(
        &self,
        id: NodeId,
        side: Side,
        remote: SocketAddr,
    ) -> LogicalConnection {
        let mut set = self.set.lock().await;
        let conn = set.entry(id).or_insert_with(|| LogicalConnection::new(id));
        match side {
            Side::Inbound => {
                conn.read = Some(remote);
                conn.readable = true;
            }
            Side::Outbound => {
                conn.write = Some(remote);
                conn.writable = true;
            }
        }
        log::info!(
            "Pool {} ({:?} {}) readable={} writable={}",
            id,
            side,
            remote,
            conn.readable,
            conn.writable
        );
        conn.clone()
    }

    /// Detach a closed socket. The entry is dropped once neither side
    /// remains. A side re-registered from another address is left alone.
    pub async fn release(&self, id: &NodeId, side: Side, remote: SocketAddr) {
        let mut set = self.set.lock().await;
        let Some(conn) = set.get_mut(id) else {
            return;
        };
        match side {
            Side::Inbound if conn.read == Some(remote) => {
                conn.read = None;
                conn.readable = false;
            }
            Side::Outbound if conn.write == Some(remote) => {
                conn.write = None;
                conn.writable = false;
            }
            _ => return,
        }
        if !conn.readable && !conn.writable {
            set.remove(id);
            log::info!("Pool removed {}", id);
        }
    }

    pub async fn get(&self, id: &NodeId) -> Option<LogicalConnection> {
        self.set.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.set.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn ids(&self) -> Vec<NodeId> {
        self.set.lock().await.keys().copied().collect()
    }
}
