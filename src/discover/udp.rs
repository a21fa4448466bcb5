//! UDP discovery transport
//!
//! Owns the socket, the read loop and the pending-request registry, and
//! answers the four discovery packets:
//! - ping      -> pong
//! - pong      -> handed to the registry
//! - findnode  -> bond the sender, reply with the closest known nodes
//! - replynode -> handed to the registry

use crate::config::{resolve, DiscoveryConfig};
use crate::core::NodeId;
use crate::discover::error::DiscoveryError;
use crate::discover::node::{Endpoint, Node};
use crate::discover::packet::{
    decode_packet, encode_packet, expiration, FindNode, Packet, PacketKind, Ping, Pong, ReplyNode,
    MAX_PACKET_SIZE,
};
use crate::discover::registry::{Inbound, Registry, RegistryHandle, REQUEST_TIMEOUT};
use crate::discover::table::RoutingTable;
use crate::util::local_ip;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// The discovery transport
pub struct Udp {
    socket: UdpSocket,
    id: NodeId,
    local: Endpoint,
    table: Arc<dyn RoutingTable>,
    registry: RegistryHandle,
    token: CancellationToken,
}

impl Udp {
    /// Bind the configured address and start the read loop and registry
    pub async fn listen(
        config: &DiscoveryConfig,
        table: Arc<dyn RoutingTable>,
        token: CancellationToken,
    ) -> Result<Arc<Self>, DiscoveryError> {
        let addr = resolve(&config.listen_addr)
            .map_err(|e| DiscoveryError::Resolve(e.to_string()))?;
        let socket = UdpSocket::bind(addr).await?;
        Self::start(
            socket,
            NodeId::from_str_lossy(&config.id),
            table,
            token,
            REQUEST_TIMEOUT,
        )
    }

    /// Start a transport on an already bound socket
    pub fn start(
        socket: UdpSocket,
        id: NodeId,
        table: Arc<dyn RoutingTable>,
        token: CancellationToken,
        request_timeout: Duration,
    ) -> Result<Arc<Self>, DiscoveryError> {
        let bound = socket.local_addr()?;
        let ip = if bound.ip().is_unspecified() {
            local_ip()
        } else {
            bound.ip()
        };
        let local = Endpoint::new(ip, bound.port(), bound.port());

        let (registry, _) = Registry::spawn_with_timeout(token.clone(), request_timeout);
        let udp = Arc::new(Self {
            socket,
            id,
            local,
            table,
            registry,
            token,
        });

        log::info!("Discovery listening on {} as {}", bound, id);
        tokio::spawn(udp.clone().read_loop());
        Ok(udp)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The advertised local endpoint
    pub fn endpoint(&self) -> Endpoint {
        self.local
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DiscoveryError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn table(&self) -> &Arc<dyn RoutingTable> {
        &self.table
    }

    /// Token cancelled when the transport stops, including on socket failure
    pub fn exit_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    async fn read_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            let received = tokio::select! {
                _ = self.token.cancelled() => {
                    log::debug!("Discovery read loop stopped");
                    return;
                }
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((n, from)) => {
                    log::debug!("recv {} bytes <= {}", n, from);
                    if let Err(e) = self.handle_packet(&buf[..n], from).await {
                        log::warn!("Dropped packet from {}: {}", from, e);
                    }
                }
                Err(e) => {
                    log::error!("Discovery socket read failed: {}", e);
                    self.token.cancel();
                    return;
                }
            }
        }
    }

    async fn handle_packet(&self, buf: &[u8], from: SocketAddr) -> Result<(), DiscoveryError> {
        let (packet, sender) = decode_packet(buf)?;
        if packet.is_expired() {
            return Err(DiscoveryError::Expired(packet.kind().name()));
        }

        match packet {
            Packet::Ping(_) => {
                log::debug!("handle ping from {}; send pong", from);
                let pong = Packet::Pong(Pong {
                    to: Endpoint::from_addr(from),
                    expire: expiration(),
                });
                self.send(from, &pong).await;
                Ok(())
            }
            Packet::FindNode(_) => {
                log::debug!("handle findnode from {}", from);
                self.table
                    .bond_node(Node::new(sender, from.ip(), from.port(), from.port()));
                // the requester is never told about itself
                let nodes = self
                    .table
                    .closest()
                    .into_iter()
                    .filter(|node| node.id != sender)
                    .collect();
                let reply = Packet::ReplyNode(ReplyNode {
                    nodes,
                    expire: expiration(),
                });
                self.send(from, &reply).await;
                Ok(())
            }
            reply @ (Packet::Pong(_) | Packet::ReplyNode(_)) => {
                let kind = reply.kind();
                let inbound = Inbound {
                    packet: reply,
                    sender,
                    from,
                };
                if self.registry.deliver(inbound).await {
                    Ok(())
                } else {
                    Err(DiscoveryError::NoMatchingRequest(kind.name()))
                }
            }
        }
    }

    async fn send(&self, to: SocketAddr, packet: &Packet) {
        let data = match encode_packet(&self.id, packet) {
            Ok(data) => data,
            Err(e) => {
                log::error!("Failed to encode {} packet: {}", packet.kind().name(), e);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&data, to).await {
            log::warn!("Write to {} failed: {}", to, e);
        }
    }

    /// Ping a peer and wait for its pong; the matched reply is returned
    async fn ping_reply(&self, to: SocketAddr) -> Result<Inbound, DiscoveryError> {
        let pending = self
            .registry
            .register(PacketKind::Pong, Box::new(move |r: &Inbound| r.from == to))
            .await;

        let ping = Packet::Ping(Ping {
            from: self.local,
            to: Endpoint::from_addr(to),
            expire: expiration(),
        });
        log::debug!("ping => {}", to);
        self.send(to, &ping).await;

        pending.wait().await
    }

    /// Check that a peer is alive
    pub async fn ping(&self, to: SocketAddr) -> Result<(), DiscoveryError> {
        self.ping_reply(to).await.map(|_| ())
    }

    /// Ask a peer for its closest nodes. Invalid records are dropped; a
    /// timeout yields an empty list.
    pub async fn findnode(&self, to: SocketAddr) -> Vec<Node> {
        let pending = self
            .registry
            .register(PacketKind::ReplyNode, Box::new(move |r: &Inbound| r.from == to))
            .await;

        let request = Packet::FindNode(FindNode {
            from_id: self.id,
            expire: expiration(),
        });
        log::debug!("findnode => {}", to);
        self.send(to, &request).await;

        match pending.wait().await {
            Ok(Inbound {
                packet: Packet::ReplyNode(reply),
                ..
            }) => {
                let nodes: Vec<Node> = reply.nodes.into_iter().filter(Node::validate).collect();
                log::debug!("findnode {} returned {} nodes", to, nodes.len());
                nodes
            }
            Ok(_) => Vec::new(),
            Err(e) => {
                log::warn!("findnode {} failed: {}", to, e);
                Vec::new()
            }
        }
    }

    /// Block until some pong arrives on this transport
    pub async fn wait_for_ping(&self) -> Result<(), DiscoveryError> {
        self.registry
            .register(PacketKind::Pong, Box::new(|_: &Inbound| true))
            .await
            .wait()
            .await
            .map(|_| ())
    }

    /// Ping a peer and, once it answers, record it in the routing table
    pub async fn bond(&self, to: SocketAddr) -> Result<Node, DiscoveryError> {
        let reply = self.ping_reply(to).await?;
        let node = Node::new(reply.sender, reply.from.ip(), reply.from.port(), reply.from.port());
        self.table.bond_node(node.clone());
        log::info!("Bonded {} at {}", node.id, reply.from);
        Ok(node)
    }

    /// Bond each bootstrap peer, then learn their neighbours
    pub async fn bootstrap(&self, peers: &[SocketAddr]) -> usize {
        let mut learned = 0;
        for peer in peers {
            if let Err(e) = self.bond(*peer).await {
                log::warn!("Bootstrap peer {} unreachable: {}", peer, e);
                continue;
            }
            for node in self.findnode(*peer).await {
                if node.id != self.id {
                    self.table.bond_node(node);
                    learned += 1;
                }
            }
        }
        log::info!("Bootstrap learned {} nodes", learned);
        learned
    }
}
