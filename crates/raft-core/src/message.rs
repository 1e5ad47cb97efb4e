//! # message
//!
//! why: define all raft rpc message types for node communication
//! relations: used by node.rs for state transitions, serialized for network
//! what: AppendEntries, RequestVote, InstallSnapshot argument/return pairs

use serde::{Deserialize, Serialize};

use crate::LogEntry;

/// Replicate log entries (also serves as heartbeat when entries is empty)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader_id: u64,
    /// index of the log entry immediately preceding the new ones
    pub prev_log_index: u64,
    /// term of the entry at prev_log_index
    pub prev_log_term: u64,
    /// leader's commit index
    pub leader_commit: u64,
    pub entries: Vec<LogEntry>,
}

/// Response to AppendEntries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRet {
    pub term: u64,
    /// true if the follower held an entry matching prev_log_index/prev_log_term
    pub success: bool,
}

/// Request a vote during leader election
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate_id: u64,
    /// index of the candidate's last log entry
    pub last_log_index: u64,
    /// term of the candidate's last log entry
    pub last_log_term: u64,
}

/// Response to a vote request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRet {
    pub term: u64,
    pub vote_granted: bool,
}

/// Ship a whole state-machine snapshot to a follower whose log has fallen
/// behind the leader's compaction point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotArgs {
    pub term: u64,
    pub leader_id: u64,
    /// the (term, index) sentinel covered by the snapshot
    pub last_log_entry: LogEntry,
    /// serialized state machine contents
    pub data: Vec<u8>,
}

/// Response to InstallSnapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotRet {
    pub term: u64,
    pub success: bool,
}
