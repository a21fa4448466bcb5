//! Broadcast bus
//!
//! Fans a published message out to every subscribed outbound connection.
//! Subscribers only see messages published after they subscribe.

use crate::core::NodeId;
use crate::network::message::GossipMessage;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
pub struct Broadcast {
    subscribers: Mutex<HashMap<NodeId, mpsc::UnboundedSender<GossipMessage>>>,
}

impl Broadcast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a peer's channel, replacing any earlier subscription for it
    pub fn subscribe(&self, id: NodeId, sender: mpsc::UnboundedSender<GossipMessage>) {
        self.lock().insert(id, sender);
        log::debug!("{} subscribed to broadcast", id);
    }

    pub fn unsubscribe(&self, id: &NodeId) {
        self.lock().remove(id);
    }

    /// Publish to every live subscriber; returns how many received it
    pub fn send(&self, msg: GossipMessage) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|id, sender| {
            let alive = sender.send(msg.clone()).is_ok();
            if !alive {
                log::debug!("Dropping closed subscriber {}", id);
            }
            alive
        });
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<NodeId, mpsc::UnboundedSender<GossipMessage>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
