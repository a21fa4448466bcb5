//! DPoS node CLI
//!
//! Runs a block-producing gossip node from a node-set config, or a
//! standalone discovery transport.

use clap::{Parser, Subcommand};
use dpos_p2p::config::{resolve, DiscoveryConfig, NodeSetConfig};
use dpos_p2p::discover::{Table, Udp};
use dpos_p2p::network::GossipNode;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "dpos-node")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "A DPoS block producer with UDP discovery and TCP gossip", long_about = None)]
struct Cli {
    /// Node-set configuration file
    #[arg(short, long, default_value = "nodes.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a block-producing node
    Start {
        /// Position of this node in the configured node set
        #[arg(short, long)]
        index: usize,
    },

    /// Run a discovery transport
    Discover {
        /// UDP listen address, overriding the config file
        #[arg(short, long)]
        udp: Option<String>,

        /// Ping this peer, then exit
        #[arg(long)]
        ping: Option<String>,

        /// Ask this peer for its closest nodes, then exit
        #[arg(long)]
        findnode: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Start { index } => rt.block_on(run_node(&cli.config, index)),
        Commands::Discover {
            udp,
            ping,
            findnode,
        } => rt.block_on(run_discovery(&cli.config, udp, ping, findnode)),
    }
}

async fn run_node(path: &PathBuf, index: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = NodeSetConfig::load(path)?;
    let keys = config.node(index)?.key_pair()?;
    let node = GossipNode::new(index, config, keys)?;

    let exit = node.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        exit.shutdown();
    });

    node.start().await?;
    Ok(())
}

async fn run_discovery(
    path: &PathBuf,
    udp: Option<String>,
    ping: Option<String>,
    findnode: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = if path.exists() {
        NodeSetConfig::load(path)?.discovery.unwrap_or_default()
    } else {
        DiscoveryConfig::default()
    };
    if let Some(addr) = udp {
        config.listen_addr = addr;
    }

    let id = dpos_p2p::NodeId::from_str_lossy(&config.id);
    let token = CancellationToken::new();
    let transport = Udp::listen(&config, Arc::new(Table::new(id)), token.clone()).await?;

    if let Some(peer) = ping {
        let peer = resolve(&peer)?;
        transport.ping(peer).await?;
        log::info!("{} is alive", peer);
        transport.shutdown();
        return Ok(());
    }

    if let Some(peer) = findnode {
        let peer = resolve(&peer)?;
        for node in transport.findnode(peer).await {
            println!("{} {}", node.id, node.udp_addr());
        }
        transport.shutdown();
        return Ok(());
    }

    let bootstrap: Vec<SocketAddr> = config
        .bootstrap
        .iter()
        .filter_map(|addr| match resolve(addr) {
            Ok(addr) => Some(addr),
            Err(e) => {
                log::warn!("Skipping bootstrap peer: {}", e);
                None
            }
        })
        .collect();
    transport.bootstrap(&bootstrap).await;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutting down discovery...");
            transport.shutdown();
        }
        _ = token.cancelled() => {
            log::error!("Discovery transport stopped");
        }
    }
    Ok(())
}
