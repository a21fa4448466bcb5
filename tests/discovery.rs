//! Live discovery transports on loopback

use dpos_p2p::config::DiscoveryConfig;
use dpos_p2p::core::NodeId;
use dpos_p2p::discover::{
    decode_packet, encode_packet, packet::expiration, Packet, PacketKind, Pong, RoutingTable,
    Table, Udp, HEADER_LEN,
};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

async fn transport(name: &str) -> (Arc<Udp>, Arc<Table>) {
    let config = DiscoveryConfig {
        id: name.to_string(),
        listen_addr: "127.0.0.1:0".to_string(),
        bootstrap: Vec::new(),
    };
    let table = Arc::new(Table::new(NodeId::from(name)));
    let udp = Udp::listen(&config, table.clone(), CancellationToken::new())
        .await
        .unwrap();
    (udp, table)
}

#[tokio::test]
async fn test_concurrent_pings_all_resolve() {
    let (a, _) = transport("a").await;
    let (b, _) = transport("b").await;
    let target = b.local_addr().unwrap();

    let pings: Vec<_> = (0..8)
        .map(|_| {
            let a = a.clone();
            tokio::spawn(async move { a.ping(target).await })
        })
        .collect();
    for ping in pings {
        ping.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_bootstrap_learns_neighbours() {
    let (a, a_table) = transport("a").await;
    let (b, _) = transport("b").await;
    let (c, _) = transport("c").await;

    // a findnode request makes b record c
    c.findnode(b.local_addr().unwrap()).await;

    let learned = a.bootstrap(&[b.local_addr().unwrap()]).await;
    assert!(learned >= 1);

    let known: Vec<NodeId> = a_table.closest().iter().map(|n| n.id).collect();
    assert!(known.contains(&NodeId::from("b")));
    assert!(known.contains(&NodeId::from("c")));
    assert!(!known.contains(&NodeId::from("a")));
}

#[tokio::test]
async fn test_ping_answered_by_raw_peer() {
    let (a, _) = transport("a").await;
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer.local_addr().unwrap();

    let responder = tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        let (len, from) = peer.recv_from(&mut buf).await.unwrap();
        assert!(len > HEADER_LEN);
        assert_eq!(buf[0], PacketKind::Ping as u8);

        let (packet, sender) = decode_packet(&buf[..len]).unwrap();
        assert_eq!(sender, NodeId::from("a"));
        let Packet::Ping(ping) = packet else {
            panic!("expected ping, got {:?}", packet.kind());
        };

        let pong = Packet::Pong(Pong {
            to: ping.from,
            expire: expiration(),
        });
        let reply = encode_packet(&NodeId::from("raw"), &pong).unwrap();
        peer.send_to(&reply, from).await.unwrap();
    });

    a.ping(peer_addr).await.unwrap();
    responder.await.unwrap();
}

#[tokio::test]
async fn test_stopped_transport_fails_requests() {
    let (a, _) = transport("a").await;
    let (b, _) = transport("b").await;

    a.shutdown();
    assert!(a.exit_token().is_cancelled());
    assert!(a.ping(b.local_addr().unwrap()).await.is_err());
}
