//! entry point for running one replicated kv node
//!
//! start a 3-node cluster:
//! ```bash
//! # terminal 1 (node 1)
//! cargo run --bin node -- \
//!   --id 1 --client-listen 127.0.0.1:8101 --data-dir /tmp/raft-kv-1 \
//!   --peer 1=127.0.0.1:7101 --peer 2=127.0.0.1:7102 --peer 3=127.0.0.1:7103
//!
//! # terminals 2 and 3: same peer list, their own --id/--client-listen/--data-dir
//! ```

use std::path::PathBuf;
use std::thread;

use anyhow::Result;
use clap::Parser;
use log::info;

use raft_core::RaftConfig;
use raft_kv::{spawn_node, NodeConfig, PeerRegistry};

/// Run a replicated key-value store node
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// numeric node id (must match one entry in --peer)
    #[arg(long)]
    id: u64,

    /// address for the kv client port, e.g. 127.0.0.1:8101
    #[arg(long)]
    client_listen: String,

    /// cluster member as id=raft_addr; repeat for every member including self
    #[arg(long, value_delimiter = ',')]
    peer: Vec<String>,

    /// directory for persisted state; omitted keeps state in memory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// lower bound of the randomized election timeout, in ms
    #[arg(long, default_value_t = 1000)]
    election_timeout_min: u64,

    /// upper bound of the randomized election timeout, in ms
    #[arg(long, default_value_t = 4000)]
    election_timeout_max: u64,

    /// leader heartbeat interval, in ms
    #[arg(long, default_value_t = 500)]
    heartbeat_interval: u64,

    /// compact the log once it holds this many entries; -1 disables
    #[arg(long, default_value_t = 30)]
    compaction_threshold: i64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let members = PeerRegistry::parse_members(&args.peer)?;
    let _handle = spawn_node(NodeConfig {
        id: args.id,
        client_listen: args.client_listen.clone(),
        members,
        data_dir: args.data_dir,
        raft: RaftConfig {
            election_timeout_min: args.election_timeout_min,
            election_timeout_max: args.election_timeout_max,
            heartbeat_interval: args.heartbeat_interval,
            compaction_threshold: args.compaction_threshold,
        },
    })?;

    info!("node {} serving clients on {}", args.id, args.client_listen);
    loop {
        thread::park();
    }
}
