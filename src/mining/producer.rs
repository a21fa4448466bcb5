//! Block producer
//!
//! Emits a fresh unsigned block every slot. Signing and broadcasting are left
//! to the gossip node consuming the channel.

use crate::core::{Block, BlockChain, NodeId};
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const BLOCK_CHANNEL_SIZE: usize = 16;

/// Produces blocks on a fixed slot
pub struct Producer {
    /// Identity stamped into produced blocks
    pub id: NodeId,
    blockchain: Arc<RwLock<BlockChain>>,
    slot: Duration,
    token: CancellationToken,
}

impl Producer {
    pub fn new(
        id: NodeId,
        blockchain: Arc<RwLock<BlockChain>>,
        slot: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            id,
            blockchain,
            slot,
            token,
        }
    }

    /// Start producing; blocks arrive on the returned channel until the exit
    /// token fires or the receiver is dropped
    pub fn spawn(self) -> (mpsc::Receiver<Block>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(BLOCK_CHANNEL_SIZE);
        let task = tokio::spawn(self.produce(tx));
        (rx, task)
    }

    async fn produce(self, tx: mpsc::Sender<Block>) {
        let mut ticker = interval_at(Instant::now() + self.slot, self.slot);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.token.cancelled() => {
                    info!("Producer exiting");
                    return;
                }
                _ = ticker.tick() => {
                    let block = {
                        let chain = self.blockchain.read().await;
                        Block::new(chain.next_index(), chain.latest_hash(), self.id)
                    };
                    info!("Produced block {}", block.index);
                    if tx.send(block).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_produces_one_block_per_slot() {
        let chain = Arc::new(RwLock::new(BlockChain::new()));
        let token = CancellationToken::new();
        let producer = Producer::new(
            NodeId::from("p"),
            chain.clone(),
            Duration::from_secs(5),
            token.clone(),
        );
        let (mut blocks, _task) = producer.spawn();

        let start = Instant::now();
        let first = blocks.recv().await.unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(first.producer, NodeId::from("p"));
        assert!(start.elapsed() >= Duration::from_secs(5));

        chain.write().await.pending(first.clone());
        let second = blocks.recv().await.unwrap();
        assert_eq!(second.index, 2);
        assert_eq!(second.previous_hash, first.hash);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_exit() {
        let token = CancellationToken::new();
        let producer = Producer::new(
            NodeId::from("p"),
            Arc::new(RwLock::new(BlockChain::new())),
            Duration::from_secs(1),
            token.clone(),
        );
        let (mut blocks, task) = producer.spawn();

        token.cancel();
        task.await.unwrap();
        assert!(blocks.recv().await.is_none());
    }
}
