//! # raft-core
//!
//! why: implement the core raft consensus algorithm in pure, portable rust
//! relations: driven by raft-kv's event loop, persisted via raft-storage
//! what: state machine, election logic, log management, message types

pub mod log;
pub mod message;
pub mod node;

pub use log::{LogEntry, RaftLog};
pub use message::{
    AppendEntriesArgs, AppendEntriesRet, InstallSnapshotArgs, InstallSnapshotRet,
    RequestVoteArgs, RequestVoteRet,
};
pub use node::{RaftConfig, RaftNode, ReplicationAction, Role};
