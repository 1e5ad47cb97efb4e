//! # raft-kv
//!
//! why: expose a replicated key-value store on top of raft consensus
//! relations: drives raft-core, persists via raft-storage
//! what: kv state machine, wire protocol, peer registry, event loop, node binary
//!
//! one worker thread per node owns all raft state; tcp listener threads and
//! short-lived outbound sender threads talk to it over bounded channels.

pub mod peers;
pub mod protocol;
pub mod server;
pub mod store;

pub use peers::{PeerClient, PeerRegistry};
pub use protocol::{Command, CommandResult, KvClient};
pub use server::{spawn_node, NodeConfig, NodeHandle, NodeStatus};
pub use store::KvStore;
