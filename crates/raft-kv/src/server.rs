//! # server
//!
//! why: coordinate consensus, persistence, and the state machine from one thread
//! relations: drives raft-core's RaftNode, applies commands to store.rs,
//! persists via raft-storage, reaches peers through peers.rs
//! what: the event loop, rpc listener shims, outbound fan-out, NodeHandle
//!
//! all raft state is owned by a single worker thread. rpc listeners and
//! outbound sends run on their own threads and talk to the worker only
//! through bounded channels, so the worker never blocks on a slow peer and
//! never shares mutable state.

use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info, warn};
use rand::Rng;

use raft_core::{
    AppendEntriesArgs, AppendEntriesRet, InstallSnapshotArgs, InstallSnapshotRet, RaftConfig,
    RaftNode, ReplicationAction, RequestVoteArgs, RequestVoteRet, Role,
};
use raft_storage::{FilePersister, MemoryPersister, PersistedState, Persister};

use crate::peers::{PeerClient, PeerRegistry};
use crate::protocol::{read_frame, write_frame, Command, CommandResult, PeerReply, PeerRequest};
use crate::store::KvStore;

/// capacity of every channel feeding the event loop
const CHANNEL_CAPACITY: usize = 64;

/// a failure after which any acknowledgment would be unsafe: unpersisted
/// state, or a committed command that cannot be decoded. the whole process
/// goes down, not just the worker thread, so listeners cannot keep serving
/// on top of state that was never made durable.
fn fatal(what: &str, err: impl std::fmt::Display) -> ! {
    error!("fatal: {what}: {err}");
    std::process::abort();
}

// -- messages from the rpc shims to the event loop --

pub struct AppendEntriesInput {
    pub args: AppendEntriesArgs,
    pub respond_to: Sender<AppendEntriesRet>,
}

pub struct VoteInput {
    pub args: RequestVoteArgs,
    pub respond_to: Sender<RequestVoteRet>,
}

pub struct InstallSnapshotInput {
    pub args: InstallSnapshotArgs,
    pub respond_to: Sender<InstallSnapshotRet>,
}

pub struct CommandInput {
    pub command: Command,
    pub respond_to: Sender<CommandResult>,
}

// -- responses from outbound sends, tagged for stale filtering --

struct AppendResponse {
    peer: u64,
    request_term: u64,
    /// prev_log_index + number of entries sent
    match_hint: u64,
    ret: Result<AppendEntriesRet>,
}

struct VoteResponse {
    peer: u64,
    request_term: u64,
    ret: Result<RequestVoteRet>,
}

struct SnapshotResponse {
    peer: u64,
    request_term: u64,
    /// snapshot pointer index the request carried
    sent_index: u64,
    ret: Result<InstallSnapshotRet>,
}

/// requests arriving on the client side of the node
enum ClientEvent {
    Command(CommandInput),
    Status { respond_to: Sender<NodeStatus> },
    Shutdown,
}

/// point-in-time view of a node, for probes and tests
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub id: u64,
    pub term: u64,
    pub is_leader: bool,
    pub leader_hint: Option<u64>,
    pub commit_index: u64,
    pub last_applied: u64,
    /// log entries currently held, sentinel included
    pub log_len: usize,
    pub store: HashMap<String, String>,
}

/// everything needed to start one node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: u64,
    /// address for the kv client port
    pub client_listen: String,
    /// (id, raft_addr) for every cluster member, this node included;
    /// this node's entry doubles as its raft bind address
    pub members: Vec<(u64, String)>,
    /// directory for persisted state; None keeps everything in memory
    pub data_dir: Option<PathBuf>,
    pub raft: RaftConfig,
}

/// handle for talking to a running node from the same process
#[derive(Clone)]
pub struct NodeHandle {
    client_tx: Sender<ClientEvent>,
    shutdown: Arc<AtomicBool>,
    peer_listen: String,
    client_listen: String,
}

impl NodeHandle {
    /// submit a command and wait for its result
    ///
    /// errors out if the node shut down, or if leadership was lost after the
    /// command was accepted but before it committed (retry against the new
    /// leader).
    pub fn command(&self, command: Command) -> Result<CommandResult> {
        let (tx, rx) = bounded(1);
        self.client_tx
            .send(ClientEvent::Command(CommandInput { command, respond_to: tx }))
            .map_err(|_| anyhow!("node is shut down"))?;
        rx.recv().context("leadership lost before the command was applied")
    }

    pub fn status(&self) -> Result<NodeStatus> {
        let (tx, rx) = bounded(1);
        self.client_tx
            .send(ClientEvent::Status { respond_to: tx })
            .map_err(|_| anyhow!("node is shut down"))?;
        rx.recv().context("status reply channel closed")
    }

    /// stop the event loop and unblock both listeners
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.client_tx.send(ClientEvent::Shutdown);
        // nudge the listeners off their blocking accept
        let _ = TcpStream::connect(&self.peer_listen);
        let _ = TcpStream::connect(&self.client_listen);
    }
}

/// start a node: restore persisted state, bind both listeners, and spawn the
/// event loop. returns once the node is serving.
pub fn spawn_node(config: NodeConfig) -> Result<NodeHandle> {
    let registry = PeerRegistry::new(config.id, config.members)?;
    let peer_listen = registry
        .addr_of(config.id)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("node id {} missing from the peer list", config.id))?;

    let persister: Box<dyn Persister> = match &config.data_dir {
        Some(dir) => Box::new(FilePersister::new(dir)?),
        None => Box::new(MemoryPersister::new()),
    };

    let mut node = RaftNode::with_config(config.id, registry.cluster_ids(), config.raft);
    let mut store = KvStore::new();
    if let Some(blob) = persister.read_raft_state()? {
        let state = PersistedState::decode(&blob)?;
        node.restore(state.current_term, state.voted_for, state.log);
        info!(
            "[node {}] restored term {} with {} log entries",
            node.id,
            node.current_term,
            node.log.len()
        );
    }
    if let Some(snapshot) = persister.read_snapshot()? {
        store.restore_blob(&snapshot)?;
        info!("[node {}] restored snapshot with {} keys", node.id, store.len());
    }

    let (append_tx, append_rx) = bounded(CHANNEL_CAPACITY);
    let (vote_tx, vote_rx) = bounded(CHANNEL_CAPACITY);
    let (snap_tx, snap_rx) = bounded(CHANNEL_CAPACITY);
    let (client_tx, client_rx) = bounded(CHANNEL_CAPACITY);
    let (append_resp_tx, append_resp_rx) = bounded(CHANNEL_CAPACITY);
    let (vote_resp_tx, vote_resp_rx) = bounded(CHANNEL_CAPACITY);
    let (snap_resp_tx, snap_resp_rx) = bounded(CHANNEL_CAPACITY);

    let shutdown = Arc::new(AtomicBool::new(false));

    spawn_peer_listener(&peer_listen, append_tx, vote_tx, snap_tx, shutdown.clone())?;
    spawn_client_listener(&config.client_listen, client_tx.clone(), shutdown.clone())?;

    let server = Server {
        peers: registry.clients(),
        node,
        store,
        persister,
        pending_replies: HashMap::new(),
        append_rx,
        vote_rx,
        snap_rx,
        client_rx,
        append_resp_tx,
        append_resp_rx,
        vote_resp_tx,
        vote_resp_rx,
        snap_resp_tx,
        snap_resp_rx,
        shutdown: shutdown.clone(),
        deadline: Instant::now(),
    };

    thread::Builder::new()
        .name(format!("raft-loop-{}", config.id))
        .spawn(move || server.run())
        .context("spawn raft event loop")?;

    Ok(NodeHandle {
        client_tx,
        shutdown,
        peer_listen,
        client_listen: config.client_listen,
    })
}

/// the single-threaded event loop
struct Server {
    node: RaftNode,
    store: KvStore,
    persister: Box<dyn Persister>,
    peers: Vec<PeerClient>,
    /// log index -> reply channel for commands this leader accepted;
    /// cleared whenever leadership is lost
    pending_replies: HashMap<u64, Sender<CommandResult>>,

    append_rx: Receiver<AppendEntriesInput>,
    vote_rx: Receiver<VoteInput>,
    snap_rx: Receiver<InstallSnapshotInput>,
    client_rx: Receiver<ClientEvent>,
    append_resp_tx: Sender<AppendResponse>,
    append_resp_rx: Receiver<AppendResponse>,
    vote_resp_tx: Sender<VoteResponse>,
    vote_resp_rx: Receiver<VoteResponse>,
    snap_resp_tx: Sender<SnapshotResponse>,
    snap_resp_rx: Receiver<SnapshotResponse>,

    shutdown: Arc<AtomicBool>,
    /// the single armed timer: election timeout while follower/candidate,
    /// heartbeat interval while leader
    deadline: Instant,
}

impl Server {
    fn run(mut self) {
        self.reset_election_deadline();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let timeout = self.deadline.saturating_duration_since(Instant::now());
            let was_follower = matches!(self.node.role, Role::Follower);

            crossbeam_channel::select! {
                recv(self.append_rx) -> msg => match msg {
                    Ok(input) => self.on_append_entries(input),
                    Err(_) => break,
                },
                recv(self.vote_rx) -> msg => match msg {
                    Ok(input) => self.on_request_vote(input),
                    Err(_) => break,
                },
                recv(self.snap_rx) -> msg => match msg {
                    Ok(input) => self.on_install_snapshot(input),
                    Err(_) => break,
                },
                recv(self.client_rx) -> msg => match msg {
                    Ok(event) => {
                        if !self.on_client_event(event) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(self.append_resp_rx) -> msg => match msg {
                    Ok(resp) => self.on_append_response(resp),
                    Err(_) => break,
                },
                recv(self.vote_resp_rx) -> msg => match msg {
                    Ok(resp) => self.on_vote_response(resp),
                    Err(_) => break,
                },
                recv(self.snap_resp_rx) -> msg => match msg {
                    Ok(resp) => self.on_snapshot_response(resp),
                    Err(_) => break,
                },
                default(timeout) => self.on_deadline(),
            }

            // term-rule step-downs inside response handlers re-arm the
            // election timer here
            if !was_follower && matches!(self.node.role, Role::Follower) {
                self.reset_election_deadline();
            }

            self.persist_if_dirty();
            self.drop_orphaned_sinks();
            self.apply_committed();
        }

        info!("[node {}] event loop stopped", self.node.id);
    }

    // -- timers --

    fn reset_election_deadline(&mut self) {
        let jitter = rand::thread_rng().gen_range(
            self.node.config.election_timeout_min..=self.node.config.election_timeout_max,
        );
        self.deadline = Instant::now() + Duration::from_millis(jitter);
    }

    fn reset_heartbeat_deadline(&mut self) {
        self.deadline =
            Instant::now() + Duration::from_millis(self.node.config.heartbeat_interval);
    }

    fn on_deadline(&mut self) {
        if self.node.role.is_leader() {
            self.broadcast_append_entries();
            self.reset_heartbeat_deadline();
        } else {
            self.start_election();
        }
    }

    // -- elections --

    fn start_election(&mut self) {
        let args = self.node.start_election();
        info!(
            "[node {}] election timeout, campaigning in term {}",
            self.node.id, self.node.current_term
        );
        // the self-vote must be durable before any request leaves
        self.persist_if_dirty();

        if self.node.has_quorum() {
            // single-node cluster: nobody else to ask
            self.node.become_leader();
            self.on_became_leader();
            return;
        }

        let request_term = self.node.current_term;
        for peer in &self.peers {
            let peer = peer.clone();
            let args = args.clone();
            let tx = self.vote_resp_tx.clone();
            thread::spawn(move || {
                let ret = peer.request_vote(&args);
                let _ = tx.send(VoteResponse { peer: peer.id, request_term, ret });
            });
        }

        self.reset_election_deadline();
    }

    fn on_vote_response(&mut self, resp: VoteResponse) {
        let ret = match resp.ret {
            Ok(ret) => ret,
            Err(err) => {
                debug!(
                    "[node {}] request_vote to {} failed: {err:#}",
                    self.node.id, resp.peer
                );
                return;
            }
        };
        if self.node.handle_vote_response(resp.request_term, resp.peer, &ret) {
            self.on_became_leader();
        }
    }

    fn on_became_leader(&mut self) {
        info!(
            "[node {}] won the election for term {}",
            self.node.id, self.node.current_term
        );
        // announce immediately with an empty append entries round
        self.broadcast_append_entries();
        self.reset_heartbeat_deadline();
    }

    // -- inbound rpcs --

    fn on_append_entries(&mut self, input: AppendEntriesInput) {
        let (ret, reset) = self.node.handle_append_entries(&input.args);
        // the success answer promises the entries are durable
        self.persist_if_dirty();
        let _ = input.respond_to.send(ret);
        if reset {
            self.reset_election_deadline();
        }
    }

    fn on_request_vote(&mut self, input: VoteInput) {
        let (ret, reset) = self.node.handle_request_vote(&input.args);
        // the grant answer promises the vote is durable
        self.persist_if_dirty();
        let _ = input.respond_to.send(ret);
        if reset {
            self.reset_election_deadline();
        }
    }

    fn on_install_snapshot(&mut self, input: InstallSnapshotInput) {
        let snapshot_index = input.args.last_log_entry.index;
        let (ret, data) = self.node.handle_install_snapshot(input.args);
        if let Some(data) = data {
            // an undecodable snapshot would leave the store and the reset
            // log disagreeing
            if let Err(err) = self.store.restore_blob(&data) {
                fatal("decode installed snapshot", err);
            }
            if let Err(err) = self.persister.save_snapshot(&data) {
                fatal("persist installed snapshot", err);
            }
            info!(
                "[node {}] installed snapshot through index {}",
                self.node.id, snapshot_index
            );
        }
        self.persist_if_dirty();
        let success = ret.success;
        let _ = input.respond_to.send(ret);
        if success {
            self.reset_election_deadline();
        }
    }

    // -- client commands --

    fn on_client_event(&mut self, event: ClientEvent) -> bool {
        match event {
            ClientEvent::Command(input) => self.on_command(input),
            ClientEvent::Status { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            ClientEvent::Shutdown => return false,
        }
        true
    }

    fn on_command(&mut self, input: CommandInput) {
        if !self.node.role.is_leader() {
            let result = match self.node.leader_hint {
                Some(leader) if leader != self.node.id => CommandResult::Redirect { leader },
                _ => CommandResult::Failure { message: "no leader known, retry later".into() },
            };
            let _ = input.respond_to.send(result);
            return;
        }

        let bytes = input
            .command
            .encode()
            .unwrap_or_else(|err| fatal("encode client command", err));
        let index = self.node.append_command(bytes);
        debug!("[node {}] accepted client command at index {}", self.node.id, index);
        self.pending_replies.insert(index, input.respond_to);
        self.persist_if_dirty();
        // a single-node cluster commits without waiting for responses
        self.node.try_advance_commit_index();
        self.broadcast_append_entries();
    }

    // -- replication --

    fn broadcast_append_entries(&self) {
        let request_term = self.node.current_term;
        for peer in &self.peers {
            let Some(action) = self.node.replication_for(peer.id) else {
                continue;
            };
            match action {
                ReplicationAction::Entries(args) => {
                    let match_hint = args.prev_log_index + args.entries.len() as u64;
                    debug!(
                        "[node {}] -> [node {}] append_entries prev={} entries={} commit={}",
                        self.node.id,
                        peer.id,
                        args.prev_log_index,
                        args.entries.len(),
                        args.leader_commit
                    );
                    let peer = peer.clone();
                    let tx = self.append_resp_tx.clone();
                    thread::spawn(move || {
                        let ret = peer.append_entries(&args);
                        let _ = tx.send(AppendResponse {
                            peer: peer.id,
                            request_term,
                            match_hint,
                            ret,
                        });
                    });
                }
                ReplicationAction::Snapshot { last_log_entry } => {
                    let data = match self.persister.read_snapshot() {
                        Ok(Some(data)) => data,
                        Ok(None) => {
                            warn!(
                                "[node {}] snapshot slot empty, cannot catch up node {}",
                                self.node.id, peer.id
                            );
                            continue;
                        }
                        Err(err) => {
                            warn!("[node {}] snapshot read failed: {err}", self.node.id);
                            continue;
                        }
                    };
                    let sent_index = last_log_entry.index;
                    info!(
                        "[node {}] -> [node {}] install_snapshot through index {} ({} bytes)",
                        self.node.id,
                        peer.id,
                        sent_index,
                        self.persister.snapshot_size()
                    );
                    let args = InstallSnapshotArgs {
                        term: request_term,
                        leader_id: self.node.id,
                        last_log_entry,
                        data,
                    };
                    let peer = peer.clone();
                    let tx = self.snap_resp_tx.clone();
                    thread::spawn(move || {
                        let ret = peer.install_snapshot(&args);
                        let _ = tx.send(SnapshotResponse {
                            peer: peer.id,
                            request_term,
                            sent_index,
                            ret,
                        });
                    });
                }
            }
        }
    }

    fn on_append_response(&mut self, resp: AppendResponse) {
        let ret = match resp.ret {
            Ok(ret) => ret,
            Err(err) => {
                // peer unreachable: no state change, the next heartbeat retries
                debug!(
                    "[node {}] append_entries to {} failed: {err:#}",
                    self.node.id, resp.peer
                );
                return;
            }
        };
        if self
            .node
            .handle_append_response(resp.peer, resp.request_term, resp.match_hint, &ret)
        {
            debug!(
                "[node {}] commit index advanced to {}",
                self.node.id, self.node.commit_index
            );
        }
    }

    fn on_snapshot_response(&mut self, resp: SnapshotResponse) {
        let ret = match resp.ret {
            Ok(ret) => ret,
            Err(err) => {
                debug!(
                    "[node {}] install_snapshot to {} failed: {err:#}",
                    self.node.id, resp.peer
                );
                return;
            }
        };
        self.node
            .handle_snapshot_response(resp.peer, resp.request_term, resp.sent_index, &ret);
    }

    // -- apply pump and compaction --

    fn apply_committed(&mut self) {
        for entry in self.node.get_entries_to_apply() {
            let sink = if self.node.role.is_leader() {
                self.pending_replies.remove(&entry.index)
            } else {
                None
            };
            // an undecodable committed command means a protocol bug; there is
            // no way to make progress past it
            let command = Command::decode(&entry.command).unwrap_or_else(|err| {
                fatal(&format!("undecodable command at index {}", entry.index), err)
            });
            debug!("[node {}] applying index {}", self.node.id, entry.index);
            self.store.handle_command(command, sink.as_ref());
        }

        if self.node.should_compact() {
            let blob = self
                .store
                .snapshot_blob()
                .unwrap_or_else(|err| fatal("encode kv snapshot", err));
            if let Err(err) = self.persister.save_snapshot(&blob) {
                fatal("persist kv snapshot", err);
            }
            self.node.compact_log();
            info!(
                "[node {}] compacted the log through index {} ({} entries kept)",
                self.node.id,
                self.node.last_applied,
                self.node.log.len()
            );
            self.persist_if_dirty();
        }
    }

    /// reply sinks belong to the leader role; anything left over after a
    /// step-down is dropped and the clients retry elsewhere
    fn drop_orphaned_sinks(&mut self) {
        if !self.node.role.is_leader() && !self.pending_replies.is_empty() {
            debug!(
                "[node {}] dropping {} pending client replies after losing leadership",
                self.node.id,
                self.pending_replies.len()
            );
            self.pending_replies.clear();
        }
    }

    // -- persistence --

    fn persist_if_dirty(&mut self) {
        if self.node.take_persist_pending() {
            let blob = PersistedState {
                current_term: self.node.current_term,
                voted_for: self.node.voted_for,
                log: self.node.log.entries().to_vec(),
            }
            .encode()
            .unwrap_or_else(|err| fatal("encode raft state", err));
            if let Err(err) = self.persister.save_raft_state(&blob) {
                fatal("persist raft state", err);
            }
        }
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.node.id,
            term: self.node.current_term,
            is_leader: self.node.role.is_leader(),
            leader_hint: self.node.leader_hint,
            commit_index: self.node.commit_index,
            last_applied: self.node.last_applied,
            log_len: self.node.log.len(),
            store: self.store.contents(),
        }
    }
}

// -- listener shims --

fn spawn_peer_listener(
    addr: &str,
    append_tx: Sender<AppendEntriesInput>,
    vote_tx: Sender<VoteInput>,
    snap_tx: Sender<InstallSnapshotInput>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let listener =
        TcpListener::bind(addr).with_context(|| format!("bind raft port {addr}"))?;
    let addr = addr.to_string();
    thread::Builder::new()
        .name(format!("raft-listener-{addr}"))
        .spawn(move || {
            for stream in listener.incoming() {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match stream {
                    Ok(stream) => {
                        let append_tx = append_tx.clone();
                        let vote_tx = vote_tx.clone();
                        let snap_tx = snap_tx.clone();
                        thread::spawn(move || {
                            if let Err(err) =
                                handle_peer_connection(stream, append_tx, vote_tx, snap_tx)
                            {
                                debug!("peer connection error: {err:#}");
                            }
                        });
                    }
                    Err(err) => warn!("accept error on {addr}: {err}"),
                }
            }
        })
        .context("spawn raft listener")?;
    Ok(())
}

/// one request/reply exchange: read the frame, hand it to the loop with a
/// reply channel, wait for the answer, write it back
fn handle_peer_connection(
    mut stream: TcpStream,
    append_tx: Sender<AppendEntriesInput>,
    vote_tx: Sender<VoteInput>,
    snap_tx: Sender<InstallSnapshotInput>,
) -> Result<()> {
    let request: PeerRequest = read_frame(&mut stream)?;
    let reply = match request {
        PeerRequest::AppendEntries(args) => {
            let (tx, rx) = bounded(1);
            append_tx
                .send(AppendEntriesInput { args, respond_to: tx })
                .map_err(|_| anyhow!("event loop is gone"))?;
            PeerReply::AppendEntries(rx.recv()?)
        }
        PeerRequest::RequestVote(args) => {
            let (tx, rx) = bounded(1);
            vote_tx
                .send(VoteInput { args, respond_to: tx })
                .map_err(|_| anyhow!("event loop is gone"))?;
            PeerReply::RequestVote(rx.recv()?)
        }
        PeerRequest::InstallSnapshot(args) => {
            let (tx, rx) = bounded(1);
            snap_tx
                .send(InstallSnapshotInput { args, respond_to: tx })
                .map_err(|_| anyhow!("event loop is gone"))?;
            PeerReply::InstallSnapshot(rx.recv()?)
        }
    };
    write_frame(&mut stream, &reply)
}

fn spawn_client_listener(
    addr: &str,
    client_tx: Sender<ClientEvent>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let listener =
        TcpListener::bind(addr).with_context(|| format!("bind client port {addr}"))?;
    let addr = addr.to_string();
    thread::Builder::new()
        .name(format!("kv-listener-{addr}"))
        .spawn(move || {
            for stream in listener.incoming() {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match stream {
                    Ok(stream) => {
                        let client_tx = client_tx.clone();
                        thread::spawn(move || {
                            if let Err(err) = handle_client_connection(stream, client_tx) {
                                debug!("client connection error: {err:#}");
                            }
                        });
                    }
                    Err(err) => warn!("accept error on {addr}: {err}"),
                }
            }
        })
        .context("spawn client listener")?;
    Ok(())
}

fn handle_client_connection(
    mut stream: TcpStream,
    client_tx: Sender<ClientEvent>,
) -> Result<()> {
    let command: Command = read_frame(&mut stream)?;
    let (tx, rx) = bounded(1);
    client_tx
        .send(ClientEvent::Command(CommandInput { command, respond_to: tx }))
        .map_err(|_| anyhow!("event loop is gone"))?;
    let result = rx.recv().unwrap_or_else(|_| CommandResult::Failure {
        message: "leadership lost before the command was applied".into(),
    });
    write_frame(&mut stream, &result)
}
