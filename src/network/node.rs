//! Gossip node
//!
//! Accepts and dials TCP links to the statically configured producer set,
//! authenticates each link with an identity handshake, dispatches inbound
//! messages and fans locally produced blocks out to every outbound link.

use crate::config::{NodeInfo, NodeSetConfig};
use crate::core::{Block, BlockChain, BlockchainError, NodeId};
use crate::crypto::KeyPair;
use crate::mining::Producer;
use crate::network::broadcast::Broadcast;
use crate::network::codec::MessageCodec;
use crate::network::error::GossipError;
use crate::network::message::{GossipMessage, MsgType};
use crate::network::pool::{ConnectionPool, Side};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

/// Limit on a single TCP connect attempt
const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Limit on waiting for the peer's half of the handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Limit on a single framed write to a peer
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type Conn = Framed<TcpStream, MessageCodec>;

/// A block-producing gossip node
pub struct GossipNode {
    id: NodeId,
    index: usize,
    config: NodeSetConfig,
    keys: KeyPair,
    pool: Arc<ConnectionPool>,
    bus: Arc<Broadcast>,
    blockchain: Arc<RwLock<BlockChain>>,
    token: CancellationToken,
}

impl GossipNode {
    /// Create the node at position `index` of the configured node set
    pub fn new(index: usize, config: NodeSetConfig, keys: KeyPair) -> Result<Arc<Self>, GossipError> {
        let id = config.node(index)?.node_id();
        Ok(Arc::new(Self {
            id,
            index,
            config,
            keys,
            pool: Arc::new(ConnectionPool::new()),
            bus: Arc::new(Broadcast::new()),
            blockchain: Arc::new(RwLock::new(BlockChain::new())),
            token: CancellationToken::new(),
        }))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn blockchain(&self) -> &Arc<RwLock<BlockChain>> {
        &self.blockchain
    }

    pub fn exit_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop producing, forwarding and accepting
    pub fn shutdown(&self) {
        log::info!("Node {} shutting down...", self.id);
        self.token.cancel();
    }

    /// Run everything: listen, dial the node set, produce and broadcast
    /// blocks. Returns once the node is shut down.
    pub async fn start(self: Arc<Self>) -> Result<(), GossipError> {
        let addr = self.config.node(self.index)?.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        log::info!("Node {} started on {}", self.id, addr);

        self.serve(listener);
        self.connect_peers();

        let producer = Producer::new(
            self.id,
            self.blockchain.clone(),
            self.config.produce_block_slot(),
            self.token.clone(),
        );
        let (blocks, _) = producer.spawn();
        self.run(blocks).await;
        Ok(())
    }

    /// Spawn the accept loop on a bound listener
    pub fn serve(self: &Arc<Self>, listener: TcpListener) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = node.token.cancelled() => return,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, addr)) => {
                        log::info!("Incoming connection from {}", addr);
                        tokio::spawn(node.clone().handle_accept(stream, addr));
                    }
                    Err(e) => {
                        log::error!("Accept error: {}", e);
                    }
                }
            }
        })
    }

    /// Spawn a dial task for every configured peer other than ourselves
    pub fn connect_peers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.config
            .nodes
            .iter()
            .filter(|peer| peer.node_id() != self.id)
            .map(|peer| self.spawn_dial(peer.clone()))
            .collect()
    }

    /// Keep an outbound link to `peer` alive until shutdown. A failed
    /// handshake abandons the peer.
    pub fn spawn_dial(self: &Arc<Self>, peer: NodeInfo) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            while !node.token.is_cancelled() {
                match node.connect(&peer).await {
                    Ok(()) => {}
                    Err(e @ GossipError::HandshakeFailed(_)) => {
                        log::warn!("Handshake with {} failed: {}", peer.addr, e);
                        return;
                    }
                    Err(e) => log::warn!("Connection to {} lost: {}", peer.addr, e),
                }
                node.pause(node.config.dial_retry_delay()).await;
            }
        })
    }

    /// One outbound session: dial until connected, handshake, register the
    /// write side, then forward broadcasts until the link or the node stops
    pub async fn connect(self: &Arc<Self>, peer: &NodeInfo) -> Result<(), GossipError> {
        let addr = peer.socket_addr()?;
        let Some(stream) = self.dial(addr).await else {
            return Ok(());
        };
        log::info!("Connected to {} ok", addr);

        let mut conn = Framed::new(stream, MessageCodec);
        let remote_id = self.handshake(&mut conn).await?;
        let expected = peer.node_id();
        if remote_id != expected {
            return Err(GossipError::HandshakeFailed(format!(
                "expected {} but {} answered",
                expected, remote_id
            )));
        }

        let entry = self.pool.add_or_update(remote_id, Side::Outbound, addr).await;
        let mut inbox = entry.inbox.lock().await;
        // leftovers from an earlier session are not replayed
        while inbox.try_recv().is_ok() {}
        self.bus.subscribe(remote_id, entry.broadcast.clone());

        let result = self.forward(&mut conn, remote_id, &mut inbox).await;

        self.bus.unsubscribe(&remote_id);
        drop(inbox);
        self.pool.release(&remote_id, Side::Outbound, addr).await;
        result
    }

    /// Retry until a TCP connection succeeds; `None` on shutdown
    async fn dial(&self, addr: SocketAddr) -> Option<TcpStream> {
        loop {
            let attempt = tokio::select! {
                _ = self.token.cancelled() => return None,
                attempt = timeout(DIAL_TIMEOUT, TcpStream::connect(addr)) => attempt,
            };
            match attempt {
                Ok(Ok(stream)) => return Some(stream),
                Ok(Err(e)) => log::debug!("Dial {} failed: {}", addr, e),
                Err(_) => log::debug!("Dial {} timed out", addr),
            }
            if !self.pause(self.config.dial_retry_delay()).await {
                return None;
            }
        }
    }

    /// Sleep unless shut down first; returns false on shutdown
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Initiator side: send our id, expect the peer's id back
    async fn handshake(&self, conn: &mut Conn) -> Result<NodeId, GossipError> {
        conn.send(GossipMessage::identity_request(self.id)).await?;
        let rsp = read_handshake_message(conn).await?;
        log::debug!("Handshake response {} from {}", rsp.type_name(), rsp.id);
        if rsp.msg_type != MsgType::IdentityResponse {
            return Err(GossipError::HandshakeFailed(format!(
                "unexpected {} response",
                rsp.type_name()
            )));
        }
        Ok(rsp.id)
    }

    /// Responder side: expect an identity request, answer with our id
    async fn handshake_check(&self, conn: &mut Conn) -> Result<NodeId, GossipError> {
        let req = read_handshake_message(conn).await?;
        if req.msg_type != MsgType::IdentityRequest {
            return Err(GossipError::HandshakeFailed(format!(
                "unexpected {} request",
                req.type_name()
            )));
        }
        conn.send(GossipMessage::identity_response(self.id)).await?;
        Ok(req.id)
    }

    async fn forward(
        &self,
        conn: &mut Conn,
        remote_id: NodeId,
        inbox: &mut mpsc::UnboundedReceiver<GossipMessage>,
    ) -> Result<(), GossipError> {
        let period = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;

                _ = self.token.cancelled() => return Ok(()),
                msg = inbox.recv() => {
                    let Some(msg) = msg else { return Ok(()) };
                    log::debug!("Forwarding {} to {}", msg.type_name(), remote_id);
                    self.write(conn, msg).await?;
                }
                _ = heartbeat.tick() => {
                    self.write(conn, GossipMessage::heartbeat(self.id)).await?;
                }
                frame = conn.next() => match frame {
                    Some(Ok(frame)) => match GossipMessage::from_bytes(&frame) {
                        Ok(msg) => {
                            if let Err(e) = self.handle_message(conn, msg).await {
                                log::warn!("Failed to handle message from {}: {}", remote_id, e);
                            }
                        }
                        Err(e) => log::warn!("Dropped message from {}: {}", remote_id, e),
                    },
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(GossipError::ConnectionClosed),
                },
            }
        }
    }

    /// Write one message unless the node shuts down or the peer stalls
    async fn write(&self, conn: &mut Conn, msg: GossipMessage) -> Result<(), GossipError> {
        tokio::select! {
            _ = self.token.cancelled() => Ok(()),
            sent = timeout(WRITE_TIMEOUT, conn.send(msg)) => match sent {
                Ok(result) => Ok(result?),
                Err(_) => Err(GossipError::SocketError(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "write timed out",
                ))),
            },
        }
    }

    async fn handle_accept(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let mut conn = Framed::new(stream, MessageCodec);
        let remote_id = match self.handshake_check(&mut conn).await {
            Ok(id) => id,
            Err(e) => {
                log::warn!("Handshake fail from {}: {}", addr, e);
                return;
            }
        };

        self.pool.add_or_update(remote_id, Side::Inbound, addr).await;

        loop {
            let frame = tokio::select! {
                _ = self.token.cancelled() => break,
                frame = conn.next() => frame,
            };
            match frame {
                Some(Ok(frame)) => {
                    let msg = match GossipMessage::from_bytes(&frame) {
                        Ok(msg) => msg,
                        Err(e) => {
                            log::warn!("Dropped message from {}: {}", addr, e);
                            continue;
                        }
                    };
                    if let Err(e) = self.handle_message(&mut conn, msg).await {
                        log::warn!("Failed to handle message from {}: {}", addr, e);
                    }
                }
                Some(Err(e)) => {
                    log::warn!("Error reading from {}: {}", addr, e);
                    continue;
                }
                None => {
                    log::info!("Closed {}", addr);
                    break;
                }
            }
        }

        self.pool.release(&remote_id, Side::Inbound, addr).await;
    }

    async fn handle_message(&self, conn: &mut Conn, msg: GossipMessage) -> Result<(), GossipError> {
        log::debug!("Received {} from {}", msg.type_name(), msg.id);

        match msg.msg_type {
            MsgType::IdentityRequest => {
                self.write(conn, GossipMessage::identity_response(self.id))
                    .await?;
            }
            MsgType::IdentityResponse => {}
            MsgType::BlockData => {
                let block = Block::decode(&msg.data)?;
                match self.blockchain.write().await.add(block) {
                    Ok(()) => {}
                    Err(BlockchainError::DuplicateBlock(hash)) => {
                        log::debug!("Ignoring known block {}", hash);
                    }
                    Err(BlockchainError::InvalidBlock(e)) => return Err(e.into()),
                }
            }
            MsgType::HeartBeat => {}
        }
        Ok(())
    }

    /// Sign a produced block, publish it to every outbound link and mark it
    /// pending. Returns the number of links it was handed to.
    pub async fn publish_block(&self, mut block: Block) -> Result<usize, GossipError> {
        block.sign_block(&self.keys)?;
        let msg = GossipMessage::new(MsgType::BlockData, self.id, block.encode()?);
        let delivered = self.bus.send(msg);
        log::info!("Broadcast block {} to {} peers", block.index, delivered);
        self.blockchain.write().await.pending(block);
        Ok(delivered)
    }

    /// Consume produced blocks until shutdown
    pub async fn run(&self, mut blocks: mpsc::Receiver<Block>) {
        loop {
            tokio::select! {
                biased;

                _ = self.token.cancelled() => {
                    log::info!("Node {} stopped", self.id);
                    return;
                }
                block = blocks.recv() => {
                    let Some(block) = block else { return };
                    log::info!("Produce block and broadcast");
                    if let Err(e) = self.publish_block(block).await {
                        log::error!("Failed to publish block: {}", e);
                    }
                }
            }
        }
    }
}

async fn read_handshake_message(conn: &mut Conn) -> Result<GossipMessage, GossipError> {
    let frame = timeout(HANDSHAKE_TIMEOUT, conn.next())
        .await
        .map_err(|_| GossipError::HandshakeFailed("timed out".to_string()))?;
    match frame {
        Some(Ok(frame)) => GossipMessage::from_bytes(&frame)
            .map_err(|e| GossipError::HandshakeFailed(e.to_string())),
        Some(Err(e)) => Err(GossipError::HandshakeFailed(e.to_string())),
        None => Err(GossipError::HandshakeFailed(
            GossipError::ConnectionClosed.to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(addrs: &[SocketAddr]) -> NodeSetConfig {
        NodeSetConfig {
            dial_retry_delay_ms: 20,
            nodes: addrs
                .iter()
                .enumerate()
                .map(|(index, addr)| NodeInfo {
                    index,
                    id: format!("node{index}"),
                    addr: addr.to_string(),
                    key: None,
                })
                .collect(),
            ..NodeSetConfig::default()
        }
    }

    #[tokio::test]
    async fn test_new_rejects_bad_index() {
        let config = config_for(&["127.0.0.1:1".parse().unwrap()]);
        assert!(matches!(
            GossipNode::new(3, config, KeyPair::generate()),
            Err(GossipError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_handshake_with_wrong_message_fails() {
        let fake = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fake_addr = fake.local_addr().unwrap();
        let config = config_for(&["127.0.0.1:1".parse().unwrap(), fake_addr]);
        let node = GossipNode::new(0, config.clone(), KeyPair::generate()).unwrap();

        tokio::spawn(async move {
            let (stream, _) = fake.accept().await.unwrap();
            let mut conn = Framed::new(stream, MessageCodec);
            let _ = conn.next().await;
            conn.send(GossipMessage::heartbeat(NodeId::from("node1")))
                .await
                .unwrap();
            // keep the socket open until the initiator gives up
            let _ = conn.next().await;
        });

        let result = node.connect(config.node(1).unwrap()).await;
        assert!(matches!(result, Err(GossipError::HandshakeFailed(_))));
        assert!(node.pool().is_empty().await);
    }

    #[tokio::test]
    async fn test_publish_block_marks_pending() {
        let config = config_for(&["127.0.0.1:1".parse().unwrap()]);
        let node = GossipNode::new(0, config, KeyPair::generate()).unwrap();
        let block = {
            let chain = node.blockchain().read().await;
            Block::new(chain.next_index(), chain.latest_hash(), node.id())
        };

        let delivered = node.publish_block(block).await.unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(node.blockchain().read().await.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_inbound_handshake_registers_read_side() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let node = GossipNode::new(0, config_for(&[addr]), KeyPair::generate()).unwrap();
        node.serve(listener);

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = Framed::new(stream, MessageCodec);
        conn.send(GossipMessage::identity_request(NodeId::from("client")))
            .await
            .unwrap();
        let rsp = GossipMessage::from_bytes(&conn.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(rsp.msg_type, MsgType::IdentityResponse);
        assert_eq!(rsp.id, NodeId::from("node0"));

        // a late identity request is answered on the same socket
        conn.send(GossipMessage::identity_request(NodeId::from("client")))
            .await
            .unwrap();
        let again = GossipMessage::from_bytes(&conn.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(again.msg_type, MsgType::IdentityResponse);

        let entry = node.pool().get(&NodeId::from("client")).await.unwrap();
        assert!(entry.readable && !entry.writable);

        drop(conn);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !node.pool().is_empty().await {
            assert!(Instant::now() < deadline, "entry not released");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        node.shutdown();
    }

    #[tokio::test]
    async fn test_inbound_without_identity_request_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let node = GossipNode::new(0, config_for(&[addr]), KeyPair::generate()).unwrap();
        node.serve(listener);

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = Framed::new(stream, MessageCodec);
        conn.send(GossipMessage::heartbeat(NodeId::from("client")))
            .await
            .unwrap();

        let next = timeout(Duration::from_secs(5), conn.next()).await.unwrap();
        assert!(!matches!(next, Some(Ok(_))));
        assert!(node.pool().is_empty().await);
        node.shutdown();
    }

    /// Accept one link on `fake`, answer the handshake as `node1` and hand
    /// back the framed socket
    async fn accept_as_node1(fake: TcpListener) -> Conn {
        let (stream, _) = fake.accept().await.unwrap();
        let mut conn = Framed::new(stream, MessageCodec);
        let req = GossipMessage::from_bytes(&conn.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(req.msg_type, MsgType::IdentityRequest);
        conn.send(GossipMessage::identity_response(NodeId::from("node1")))
            .await
            .unwrap();
        conn
    }

    async fn until_subscribed(node: &GossipNode) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while node.bus.subscriber_count() == 0 {
            assert!(Instant::now() < deadline, "never subscribed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_stale_inbox_not_replayed_on_reconnect() {
        let fake = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fake_addr = fake.local_addr().unwrap();
        let config = config_for(&["127.0.0.1:1".parse().unwrap(), fake_addr]);
        let node = GossipNode::new(0, config.clone(), KeyPair::generate()).unwrap();
        let peer = NodeId::from("node1");

        // the inbound side keeps the entry alive with a message still queued
        let entry = node
            .pool()
            .add_or_update(peer, Side::Inbound, "127.0.0.1:2".parse().unwrap())
            .await;
        entry
            .broadcast
            .send(GossipMessage::new(MsgType::BlockData, node.id(), vec![1]))
            .unwrap();

        let session = {
            let node = node.clone();
            let info = config.node(1).unwrap().clone();
            tokio::spawn(async move { node.connect(&info).await })
        };
        let mut remote = accept_as_node1(fake).await;
        until_subscribed(&node).await;

        node.bus
            .send(GossipMessage::new(MsgType::BlockData, node.id(), vec![2]));
        let first = GossipMessage::from_bytes(&remote.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.data, vec![2]);

        node.shutdown();
        session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_not_blocked_by_stalled_peer() {
        let fake = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fake_addr = fake.local_addr().unwrap();
        let config = config_for(&["127.0.0.1:1".parse().unwrap(), fake_addr]);
        let node = GossipNode::new(0, config.clone(), KeyPair::generate()).unwrap();

        let session = {
            let node = node.clone();
            let info = config.node(1).unwrap().clone();
            tokio::spawn(async move { node.connect(&info).await })
        };
        // the peer completes the handshake and then never reads again
        let _remote = accept_as_node1(fake).await;
        until_subscribed(&node).await;

        for _ in 0..32 {
            node.bus.send(GossipMessage::new(
                MsgType::BlockData,
                node.id(),
                vec![0u8; 512 * 1024],
            ));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        node.shutdown();
        let result = timeout(Duration::from_secs(2), session)
            .await
            .expect("outbound session ignored shutdown");
        result.unwrap().unwrap();
    }
}
