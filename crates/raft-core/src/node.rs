//! # node
//!
//! why: define the raft node state machine and state transitions
//! relations: uses message.rs for rpc types, log.rs for entry management
//! what: Role enum, RaftConfig, RaftNode with election/replication handlers

use std::collections::HashMap;

use crate::message::{
    AppendEntriesArgs, AppendEntriesRet, InstallSnapshotArgs, InstallSnapshotRet,
    RequestVoteArgs, RequestVoteRet,
};
use crate::{LogEntry, RaftLog};

/// the three possible states a raft node can be in
///
/// per-role bookkeeping lives inside the variant, so a candidate's vote
/// tally and a leader's replication indices cannot outlive the transition
/// away from that role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// passive state - listens for heartbeats, votes when asked
    Follower,
    /// transitional state - requesting votes to become leader
    Candidate {
        /// node ids that granted their vote in the current term
        votes_received: Vec<u64>,
    },
    /// active state - manages log replication, sends heartbeats
    Leader {
        /// for each peer, index of the next log entry to send
        next_index: HashMap<u64, u64>,
        /// for each peer, highest log index known to be replicated there
        match_index: HashMap<u64, u64>,
    },
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader { .. })
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, Role::Candidate { .. })
    }
}

/// configuration for raft timing and compaction
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// minimum election timeout in ms (default: 1000)
    pub election_timeout_min: u64,
    /// maximum election timeout in ms (default: 4000)
    pub election_timeout_max: u64,
    /// heartbeat interval in ms (default: 500)
    pub heartbeat_interval: u64,
    /// compact the log once it holds this many entries; -1 disables (default: 30)
    pub compaction_threshold: i64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 1000,
            election_timeout_max: 4000,
            heartbeat_interval: 500,
            compaction_threshold: 30,
        }
    }
}

/// what the leader should send a given peer next
#[derive(Debug, Clone)]
pub enum ReplicationAction {
    /// the peer's next entry is still in the log: send the pending suffix
    /// (empty for a pure heartbeat)
    Entries(AppendEntriesArgs),
    /// the peer's next entry was compacted away: ship the snapshot instead.
    /// the caller attaches the snapshot blob from its persister.
    Snapshot {
        last_log_entry: LogEntry,
    },
}

/// a single raft node in the cluster
///
/// implements the raft consensus algorithm including:
/// - leader election with randomized timeouts
/// - log replication with consistency checks
/// - commit index management with the current-term commit guard
/// - log compaction anchored on a snapshot sentinel
///
/// the node is a pure state machine: it never talks to the network, a clock,
/// or disk. a single driver thread feeds it events and is responsible for
/// persisting `(current_term, voted_for, log)` whenever `take_persist_pending`
/// reports a change, before any reply depending on that change leaves the
/// process.
#[derive(Debug)]
pub struct RaftNode {
    // -- persistent state (must survive restarts) --

    /// unique identifier for this node
    pub id: u64,
    /// current term number (monotonically increasing)
    pub current_term: u64,
    /// node id that received our vote in current term (if any)
    pub voted_for: Option<u64>,
    /// the replicated log entries, anchored on the snapshot sentinel
    pub log: RaftLog,

    // -- volatile state (all nodes) --

    /// current role (follower, candidate, or leader)
    pub role: Role,
    /// index of highest log entry known to be committed
    pub commit_index: u64,
    /// index of highest log entry applied to state machine
    pub last_applied: u64,
    /// the node currently believed to be leader, for client redirects
    pub leader_hint: Option<u64>,

    // -- cluster configuration --

    /// list of all node ids in the cluster (including self)
    pub cluster_nodes: Vec<u64>,
    /// timing and compaction configuration
    pub config: RaftConfig,

    /// set whenever term, vote, or log changed and a persist is owed
    persist_pending: bool,
}

impl RaftNode {
    /// create a new raft node in follower state
    pub fn new(id: u64, cluster_nodes: Vec<u64>) -> Self {
        Self::with_config(id, cluster_nodes, RaftConfig::default())
    }

    /// create a node with custom configuration
    pub fn with_config(id: u64, cluster_nodes: Vec<u64>, config: RaftConfig) -> Self {
        Self {
            id,
            current_term: 0,
            voted_for: None,
            log: RaftLog::new(),
            role: Role::Follower,
            commit_index: 0,
            last_applied: 0,
            leader_hint: None,
            cluster_nodes,
            config,
            persist_pending: false,
        }
    }

    /// reload persistent state after a restart
    ///
    /// commit and apply cursors restart at the snapshot sentinel; everything
    /// at or below it is covered by the snapshot blob the driver loads into
    /// the state machine.
    pub fn restore(&mut self, current_term: u64, voted_for: Option<u64>, entries: Vec<LogEntry>) {
        self.current_term = current_term;
        self.voted_for = voted_for;
        self.log = RaftLog::from_entries(entries);
        self.commit_index = self.log.first_index();
        self.last_applied = self.log.first_index();
    }

    // -- persistence bookkeeping --

    fn mark_dirty(&mut self) {
        self.persist_pending = true;
    }

    /// whether term/vote/log changed since the last call; clears the flag
    pub fn take_persist_pending(&mut self) -> bool {
        std::mem::take(&mut self.persist_pending)
    }

    // -- cluster helpers --

    /// get the number of nodes needed for quorum (majority)
    pub fn quorum_size(&self) -> usize {
        (self.cluster_nodes.len() / 2) + 1
    }

    /// ids of every node in the cluster except this one
    pub fn peer_ids(&self) -> impl Iterator<Item = u64> + '_ {
        let me = self.id;
        self.cluster_nodes.iter().copied().filter(move |&p| p != me)
    }

    // -- state transitions --

    /// step down to follower, adopting `term` if it is newer
    ///
    /// a newer term clears the vote; an equal term keeps it (the vote binds
    /// for the whole term).
    pub fn become_follower(&mut self, term: u64) {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.leader_hint = None;
            self.mark_dirty();
        }
        self.role = Role::Follower;
    }

    /// become leader: initialize per-peer replication state
    pub fn become_leader(&mut self) {
        let next = self.log.last_index() + 1;
        let next_index = self.peer_ids().map(|p| (p, next)).collect();
        // match index is a conservative measure of the shared log prefix,
        // unknown at election time
        let match_index = self.peer_ids().map(|p| (p, 0)).collect();
        self.role = Role::Leader { next_index, match_index };
        self.leader_hint = Some(self.id);
    }

    /// start an election: become candidate, increment term, vote for self
    ///
    /// returns the vote request to broadcast to all peers. the caller must
    /// persist before sending (the self-vote binds this term).
    pub fn start_election(&mut self) -> RequestVoteArgs {
        self.current_term += 1;
        self.voted_for = Some(self.id);
        // the previous term's leader is gone; this term's is not yet known
        self.leader_hint = None;
        self.role = Role::Candidate { votes_received: vec![self.id] };
        self.mark_dirty();

        RequestVoteArgs {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        }
    }

    /// check if the current vote tally already reaches quorum
    ///
    /// true immediately after `start_election` in a single-node cluster.
    pub fn has_quorum(&self) -> bool {
        match &self.role {
            Role::Candidate { votes_received } => votes_received.len() >= self.quorum_size(),
            _ => false,
        }
    }

    // -- request vote --

    /// handle a vote request from a candidate
    /// returns (response, should_reset_election_timer)
    pub fn handle_request_vote(&mut self, args: &RequestVoteArgs) -> (RequestVoteRet, bool) {
        if args.term < self.current_term {
            return (
                RequestVoteRet { term: self.current_term, vote_granted: false },
                false,
            );
        }

        if args.term > self.current_term {
            self.become_follower(args.term);
        }

        // grant iff we have not voted for someone else this term and the
        // candidate's log is at least as up-to-date as ours
        let can_vote =
            self.voted_for.is_none() || self.voted_for == Some(args.candidate_id);
        let log_ok = self.is_log_up_to_date(args.last_log_index, args.last_log_term);
        let vote_granted = can_vote && log_ok;

        if vote_granted {
            self.voted_for = Some(args.candidate_id);
            self.mark_dirty();
        }

        (
            RequestVoteRet { term: self.current_term, vote_granted },
            vote_granted,
        )
    }

    /// handle a vote response (candidate only)
    ///
    /// `request_term` is the term the request was sent under; responses from
    /// an older election round are discarded. returns true if this node just
    /// became leader.
    pub fn handle_vote_response(
        &mut self,
        request_term: u64,
        from: u64,
        ret: &RequestVoteRet,
    ) -> bool {
        if ret.term > self.current_term {
            self.become_follower(ret.term);
            return false;
        }
        if request_term != self.current_term {
            return false;
        }

        let quorum = self.quorum_size();
        let Role::Candidate { votes_received } = &mut self.role else {
            return false;
        };

        if ret.vote_granted && !votes_received.contains(&from) {
            votes_received.push(from);
            if votes_received.len() >= quorum {
                self.become_leader();
                return true;
            }
        }

        false
    }

    /// check if a candidate's log is at least as up-to-date as ours
    /// (raft paper section 5.4.1)
    fn is_log_up_to_date(&self, last_log_index: u64, last_log_term: u64) -> bool {
        let our_last_term = self.log.last_term();
        if last_log_term != our_last_term {
            last_log_term > our_last_term
        } else {
            last_log_index >= self.log.last_index()
        }
    }

    // -- append entries --

    /// handle an append entries request (any role)
    /// returns (response, should_reset_election_timer)
    pub fn handle_append_entries(
        &mut self,
        args: &AppendEntriesArgs,
    ) -> (AppendEntriesRet, bool) {
        if args.term < self.current_term {
            return (
                AppendEntriesRet { term: self.current_term, success: false },
                false,
            );
        }

        self.become_follower(args.term);
        self.leader_hint = Some(args.leader_id);

        // consistency check: our log must hold an entry at prev_log_index
        // with the matching term. index 0 always matches; the sentinel
        // matches when the snapshot covers exactly (prev_log_term,
        // prev_log_index); anything below the sentinel was compacted away
        // and is rejected.
        let consistent = args.prev_log_index == 0
            || self.log.term_at(args.prev_log_index) == Some(args.prev_log_term);
        if !consistent {
            return (
                AppendEntriesRet { term: self.current_term, success: false },
                true,
            );
        }

        let mut changed = false;
        for entry in &args.entries {
            match self.log.term_at(entry.index) {
                // already present with the same term: replayed entry, keep
                // our copy (truncating here could drop committed entries)
                Some(term) if term == entry.term => {}
                // conflicting entry: drop it and everything after, then
                // take the leader's version
                Some(_) => {
                    self.log.truncate_from(entry.index);
                    self.log.append(entry.clone());
                    changed = true;
                }
                None => {
                    // below the sentinel the entry is already covered by our
                    // snapshot; past the tail it extends the log
                    if entry.index == self.log.last_index() + 1 {
                        self.log.append(entry.clone());
                        changed = true;
                    }
                }
            }
        }
        if changed {
            self.mark_dirty();
        }

        if args.leader_commit > self.commit_index {
            let last_new = args.prev_log_index + args.entries.len() as u64;
            self.commit_index = args.leader_commit.min(last_new).max(self.commit_index);
        }

        (
            AppendEntriesRet { term: self.current_term, success: true },
            true,
        )
    }

    /// handle an append entries response (leader only)
    ///
    /// `match_hint` is prev_log_index + the number of entries that were in
    /// the request. responses tagged with an older term are discarded.
    /// returns true if commit_index advanced.
    pub fn handle_append_response(
        &mut self,
        peer: u64,
        request_term: u64,
        match_hint: u64,
        ret: &AppendEntriesRet,
    ) -> bool {
        if ret.term > self.current_term {
            self.become_follower(ret.term);
            return false;
        }
        if request_term != self.current_term {
            return false;
        }

        let Role::Leader { next_index, match_index } = &mut self.role else {
            return false;
        };

        if ret.success {
            let m = match_index.entry(peer).or_insert(0);
            *m = (*m).max(match_hint);
            next_index.insert(peer, *m + 1);
            self.try_advance_commit_index()
        } else {
            // log inconsistency: back the peer's cursor up one entry and let
            // the next heartbeat retry
            if let Some(next) = next_index.get_mut(&peer) {
                if *next > 1 {
                    *next -= 1;
                }
            }
            false
        }
    }

    /// try to advance commit_index based on match_index from followers
    ///
    /// only entries of the current term count directly (raft paper figure 8);
    /// earlier entries commit transitively. returns true if commit_index
    /// advanced.
    pub fn try_advance_commit_index(&mut self) -> bool {
        let old_commit = self.commit_index;
        let quorum = self.quorum_size();

        let peer_matches: Vec<u64> = match &self.role {
            Role::Leader { match_index, .. } => match_index.values().copied().collect(),
            _ => return false,
        };

        for n in (self.commit_index + 1)..=self.log.last_index() {
            if self.log.term_at(n) != Some(self.current_term) {
                continue;
            }
            // this node holds the entry; count the peers that do too
            let count = 1 + peer_matches.iter().filter(|&&m| m >= n).count();
            if count >= quorum {
                self.commit_index = n;
            }
        }

        self.commit_index > old_commit
    }

    // -- install snapshot --

    /// handle an install snapshot request
    ///
    /// on acceptance the log collapses to the snapshot sentinel and the
    /// returned bytes must be loaded into the state machine and saved to the
    /// snapshot slot by the caller. a snapshot that lags our commit point is
    /// acknowledged without being applied.
    pub fn handle_install_snapshot(
        &mut self,
        args: InstallSnapshotArgs,
    ) -> (InstallSnapshotRet, Option<Vec<u8>>) {
        if args.term < self.current_term {
            return (
                InstallSnapshotRet { term: self.current_term, success: false },
                None,
            );
        }

        self.become_follower(args.term);
        self.leader_hint = Some(args.leader_id);

        let last = &args.last_log_entry;
        if last.index <= self.commit_index {
            return (
                InstallSnapshotRet { term: self.current_term, success: true },
                None,
            );
        }

        self.log.reset_to(last.term, last.index);
        self.commit_index = last.index;
        self.last_applied = last.index;
        self.mark_dirty();

        (
            InstallSnapshotRet { term: self.current_term, success: true },
            Some(args.data),
        )
    }

    /// handle an install snapshot response (leader only)
    ///
    /// `sent_index` is the snapshot pointer the request carried; on success
    /// the peer's cursors jump past it.
    pub fn handle_snapshot_response(
        &mut self,
        peer: u64,
        request_term: u64,
        sent_index: u64,
        ret: &InstallSnapshotRet,
    ) {
        if ret.term > self.current_term {
            self.become_follower(ret.term);
            return;
        }
        if request_term != self.current_term {
            return;
        }

        let Role::Leader { next_index, match_index } = &mut self.role else {
            return;
        };

        if ret.success {
            let m = match_index.entry(peer).or_insert(0);
            *m = (*m).max(sent_index);
            next_index.insert(peer, *m + 1);
        }
    }

    // -- replication --

    /// append a client command to the log (leader only)
    /// returns the index the command will occupy if it is ever committed
    pub fn append_command(&mut self, command: Vec<u8>) -> u64 {
        debug_assert!(self.role.is_leader());
        let index = self.log.last_index() + 1;
        self.log.append(LogEntry::new(self.current_term, index, command));
        self.mark_dirty();
        index
    }

    /// decide what to send a peer: the pending log suffix, or the snapshot
    /// when the peer's next entry was compacted away. returns None unless
    /// this node is leader.
    pub fn replication_for(&self, peer: u64) -> Option<ReplicationAction> {
        let Role::Leader { next_index, .. } = &self.role else {
            return None;
        };

        let next = *next_index.get(&peer)?;
        let prev_log_index = next.saturating_sub(1);

        if prev_log_index < self.log.first_index() {
            return Some(ReplicationAction::Snapshot {
                last_log_entry: self.log.sentinel().clone(),
            });
        }

        let prev_log_term = if prev_log_index == 0 {
            0
        } else {
            // prev_log_index >= first_index, so the entry (or sentinel) is held
            self.log.term_at(prev_log_index).unwrap_or(0)
        };

        Some(ReplicationAction::Entries(AppendEntriesArgs {
            term: self.current_term,
            leader_id: self.id,
            prev_log_index,
            prev_log_term,
            leader_commit: self.commit_index,
            entries: self.log.entries_from(next).to_vec(),
        }))
    }

    // -- state machine application --

    /// drain committed-but-unapplied entries, in index order
    ///
    /// advances last_applied; each entry is yielded exactly once across the
    /// node's lifetime.
    pub fn get_entries_to_apply(&mut self) -> Vec<LogEntry> {
        let mut entries = Vec::new();
        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            if let Some(entry) = self.log.get(self.last_applied) {
                entries.push(entry.clone());
            }
        }
        entries
    }

    /// whether the log has grown past the compaction threshold
    pub fn should_compact(&self) -> bool {
        self.config.compaction_threshold >= 0
            && self.log.len() >= self.config.compaction_threshold as usize
            && self.last_applied > self.log.first_index()
    }

    /// compact the log up through last_applied, keeping the sentinel there
    pub fn compact_log(&mut self) {
        if self.log.compact_to(self.last_applied) {
            self.mark_dirty();
        }
    }
}
