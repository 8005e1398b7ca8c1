use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use raft_kv::{ReplicaConfig, Replica, UdpTransport};
use std::net::SocketAddr;

/// One Raft replica. Broadcasts a `hello` to the broker on startup, then
/// drives the election/replication/client-handling loop forever.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Port the broker listens on.
    broker_port: u16,

    /// This replica's id.
    id: String,

    /// Ids of every other replica in the cluster.
    #[arg(required = true, num_args = 1..)]
    peers: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let broker_addr: SocketAddr = format!("127.0.0.1:{}", args.broker_port)
        .parse()
        .context("building broker address")?;

    info!("[{}] peers: {:?}", args.id, args.peers);
    let config = ReplicaConfig::new(args.id.clone(), args.peers, broker_addr);
    let transport = UdpTransport::bind(broker_addr).context("binding replica transport")?;
    let mut replica = Replica::new(config, transport)?;

    info!("[{}] entering driver loop", args.id);
    replica.run();
}
