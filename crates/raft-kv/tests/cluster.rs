//! # cluster integration tests
//!
//! why: verify the replicated store end to end over real tcp
//! relations: exercises raft-kv's event loop, raft-core, and raft-storage
//! together
//! what: bootstrap, replication, redirects, cas, leader failover, snapshot
//! catch-up, crash recovery
//!
//! every test uses its own port range so the suite can run in parallel.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tempfile::TempDir;

use raft_core::RaftConfig;
use raft_kv::{spawn_node, Command, CommandResult, KvClient, NodeConfig, NodeHandle, NodeStatus};

const WAIT: Duration = Duration::from_secs(15);

/// short timers so elections settle in well under a second
fn fast_raft(compaction_threshold: i64) -> RaftConfig {
    RaftConfig {
        election_timeout_min: 150,
        election_timeout_max: 300,
        heartbeat_interval: 50,
        compaction_threshold,
    }
}

fn set(key: &str, value: &str) -> Command {
    Command::Set { key: key.to_string(), value: value.to_string() }
}

fn get(key: &str) -> Command {
    Command::Get { key: key.to_string() }
}

fn kv(key: &str, value: &str) -> CommandResult {
    CommandResult::Kv { key: key.to_string(), value: value.to_string() }
}

/// a cluster of real nodes on localhost, killable and restartable
struct TestCluster {
    configs: Vec<NodeConfig>,
    handles: Vec<Option<NodeHandle>>,
    _dirs: Vec<TempDir>,
}

impl TestCluster {
    /// spawn n nodes; raft ports start at base_port, client ports 100 above
    fn spawn(n: usize, base_port: u16, raft: RaftConfig, persistent: bool) -> Result<Self> {
        let members: Vec<(u64, String)> = (0..n)
            .map(|i| ((i + 1) as u64, format!("127.0.0.1:{}", base_port + i as u16)))
            .collect();

        let mut dirs = Vec::new();
        let mut configs = Vec::new();
        for i in 0..n {
            let data_dir = if persistent {
                let dir = TempDir::new()?;
                let path = dir.path().to_path_buf();
                dirs.push(dir);
                Some(path)
            } else {
                None
            };
            configs.push(NodeConfig {
                id: (i + 1) as u64,
                client_listen: format!("127.0.0.1:{}", base_port + 100 + i as u16),
                members: members.clone(),
                data_dir,
                raft: raft.clone(),
            });
        }

        let mut handles = Vec::new();
        for config in &configs {
            handles.push(Some(spawn_node(config.clone())?));
        }

        Ok(Self { configs, handles, _dirs: dirs })
    }

    fn handle(&self, id: u64) -> &NodeHandle {
        self.handles[(id - 1) as usize].as_ref().expect("node is down")
    }

    fn client_addr(&self, id: u64) -> &str {
        &self.configs[(id - 1) as usize].client_listen
    }

    fn alive(&self) -> impl Iterator<Item = (u64, &NodeHandle)> {
        self.handles
            .iter()
            .enumerate()
            .filter_map(|(i, h)| h.as_ref().map(|h| ((i + 1) as u64, h)))
    }

    fn kill(&mut self, id: u64) {
        if let Some(handle) = self.handles[(id - 1) as usize].take() {
            handle.shutdown();
        }
        thread::sleep(Duration::from_millis(100));
    }

    /// bring a killed node back on its original ports and data directory
    fn restart(&mut self, id: u64) -> Result<()> {
        let config = self.configs[(id - 1) as usize].clone();
        // the freed ports can take a moment to become bindable again
        let deadline = Instant::now() + WAIT;
        loop {
            match spawn_node(config.clone()) {
                Ok(handle) => {
                    self.handles[(id - 1) as usize] = Some(handle);
                    return Ok(());
                }
                Err(err) => {
                    if Instant::now() > deadline {
                        return Err(err);
                    }
                    thread::sleep(Duration::from_millis(200));
                }
            }
        }
    }

    /// wait until exactly one live node considers itself leader
    fn wait_for_single_leader(&self) -> Result<u64> {
        let deadline = Instant::now() + WAIT;
        loop {
            let leaders: Vec<u64> = self
                .alive()
                .filter(|(_, h)| h.status().map(|s| s.is_leader).unwrap_or(false))
                .map(|(id, _)| id)
                .collect();
            if leaders.len() == 1 {
                return Ok(leaders[0]);
            }
            if Instant::now() > deadline {
                bail!("timeout waiting for a single leader, saw {leaders:?}");
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    /// submit a command at the leader, chasing redirects and re-elections
    fn command_via_leader(&self, command: Command) -> Result<CommandResult> {
        let deadline = Instant::now() + WAIT;
        let mut target = self.wait_for_single_leader()?;
        loop {
            // a stale redirect can point at a killed node; fall back to
            // whoever is leader now
            let answer = self
                .handles
                .get((target - 1) as usize)
                .and_then(|slot| slot.as_ref())
                .map(|handle| handle.command(command.clone()));
            match answer {
                Some(Ok(CommandResult::Redirect { leader })) => target = leader,
                Some(Ok(CommandResult::Failure { .. })) | Some(Err(_)) | None => {
                    if Instant::now() > deadline {
                        bail!("command was never accepted: {command:?}");
                    }
                    thread::sleep(Duration::from_millis(100));
                    target = self.wait_for_single_leader()?;
                }
                Some(Ok(result)) => return Ok(result),
            }
        }
    }

    /// poll the live nodes' statuses until the predicate holds
    fn wait_until(
        &self,
        what: &str,
        mut predicate: impl FnMut(&[NodeStatus]) -> bool,
    ) -> Result<()> {
        let deadline = Instant::now() + WAIT;
        loop {
            let statuses: Vec<NodeStatus> =
                self.alive().filter_map(|(_, h)| h.status().ok()).collect();
            if predicate(&statuses) {
                return Ok(());
            }
            if Instant::now() > deadline {
                bail!("timed out waiting until {what}");
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    fn shutdown(mut self) {
        for slot in self.handles.iter_mut() {
            if let Some(handle) = slot.take() {
                handle.shutdown();
            }
        }
        thread::sleep(Duration::from_millis(100));
    }
}

#[test]
fn bootstrap_set_replicates_to_every_node() -> Result<()> {
    let cluster = TestCluster::spawn(3, 19100, fast_raft(-1), false)?;

    let result = cluster.command_via_leader(set("a", "1"))?;
    assert_eq!(result, kv("a", "1"));

    // the committed write reaches every node's applied state
    cluster.wait_until("all stores hold a=1", |statuses| {
        statuses.len() == 3
            && statuses
                .iter()
                .all(|s| s.store.get("a").map(String::as_str) == Some("1"))
    })?;

    // a replicated read observes the write
    assert_eq!(cluster.command_via_leader(get("a"))?, kv("a", "1"));

    // the tcp client port serves the same protocol
    let leader = cluster.wait_for_single_leader()?;
    let client = KvClient::new(cluster.client_addr(leader));
    assert_eq!(client.get("a")?, kv("a", "1"));

    cluster.shutdown();
    Ok(())
}

#[test]
fn followers_redirect_to_the_leader() -> Result<()> {
    let cluster = TestCluster::spawn(3, 19200, fast_raft(-1), false)?;
    let leader = cluster.wait_for_single_leader()?;
    let follower = (1..=3).find(|&id| id != leader).unwrap();

    // the follower learns the leader from heartbeats, then redirects
    let deadline = Instant::now() + WAIT;
    let target = loop {
        match KvClient::new(cluster.client_addr(follower)).get("a")? {
            CommandResult::Redirect { leader } => break leader,
            _ if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
            other => panic!("never redirected, last answer {:?}", other),
        }
    };

    // following the redirect reaches a node that serves the command
    assert_eq!(KvClient::new(cluster.client_addr(target)).get("a")?, kv("a", ""));

    cluster.shutdown();
    Ok(())
}

#[test]
fn cas_swaps_once_then_reports_the_current_value() -> Result<()> {
    let cluster = TestCluster::spawn(3, 19300, fast_raft(-1), false)?;

    cluster.command_via_leader(set("x", "A"))?;

    // matching expectation swaps and echoes the new value
    let leader = cluster.wait_for_single_leader()?;
    let hit = cluster.handle(leader).command(Command::Cas {
        key: "x".into(),
        expected: "A".into(),
        value: "B".into(),
    })?;
    assert_eq!(hit, kv("x", "B"));

    // the stale expectation loses and sees the current value instead
    let miss = cluster.handle(leader).command(Command::Cas {
        key: "x".into(),
        expected: "A".into(),
        value: "C".into(),
    })?;
    assert_eq!(miss, kv("x", "B"));

    assert_eq!(cluster.command_via_leader(get("x"))?, kv("x", "B"));

    cluster.shutdown();
    Ok(())
}

#[test]
fn clear_empties_every_store() -> Result<()> {
    let cluster = TestCluster::spawn(3, 19400, fast_raft(-1), false)?;

    cluster.command_via_leader(set("a", "1"))?;
    cluster.command_via_leader(set("b", "2"))?;
    assert_eq!(cluster.command_via_leader(Command::Clear)?, CommandResult::Success);

    cluster.wait_until("all stores are empty", |statuses| {
        statuses.len() == 3 && statuses.iter().all(|s| s.store.is_empty())
    })?;

    // a cleared key reads back as the empty string
    assert_eq!(cluster.command_via_leader(get("a"))?, kv("a", ""));

    cluster.shutdown();
    Ok(())
}

#[test]
fn surviving_nodes_elect_a_new_leader_and_serve_the_retry() -> Result<()> {
    let mut cluster = TestCluster::spawn(3, 19500, fast_raft(-1), false)?;

    cluster.command_via_leader(set("k", "v"))?;
    cluster.wait_until("the write reached every node", |statuses| {
        statuses.len() == 3
            && statuses
                .iter()
                .all(|s| s.store.get("k").map(String::as_str) == Some("v"))
    })?;

    // crash the leader mid-stream
    let old_leader = cluster.wait_for_single_leader()?;
    cluster.kill(old_leader);

    // the survivors hold the committed entry, so either can win
    let new_leader = cluster.wait_for_single_leader()?;
    assert_ne!(new_leader, old_leader);

    // the client's duplicate retry lands at a fresh index and still reads back
    assert_eq!(cluster.command_via_leader(set("k", "v"))?, kv("k", "v"));
    assert_eq!(cluster.command_via_leader(get("k"))?, kv("k", "v"));

    cluster.shutdown();
    Ok(())
}

#[test]
fn snapshot_install_catches_up_a_follower_with_an_empty_log() -> Result<()> {
    let mut cluster = TestCluster::spawn(3, 19600, fast_raft(10), true)?;

    let leader = cluster.wait_for_single_leader()?;
    let victim = (1..=3).find(|&id| id != leader).unwrap();
    cluster.kill(victim);

    // enough writes to compact the remaining logs at least twice
    for i in 1..=25 {
        cluster.command_via_leader(set(&format!("k{i}"), &format!("v{i}")))?;
    }
    cluster.wait_until("the live logs compacted", |statuses| {
        statuses.iter().all(|s| s.log_len < 26)
    })?;

    // the victim returns with an empty log; the entries it needs are gone
    // from the leader's log, so only an installed snapshot can catch it up
    cluster.restart(victim)?;
    cluster.wait_until("the returned follower caught up", |statuses| {
        statuses.len() == 3
            && statuses.iter().all(|s| {
                (1..=25).all(|i| {
                    s.store.get(&format!("k{i}")).map(String::as_str)
                        == Some(format!("v{i}").as_str())
                })
            })
    })?;

    let caught_up = cluster.handle(victim).status()?;
    assert!(
        caught_up.log_len < 26,
        "follower replayed entries instead of installing a snapshot (log_len {})",
        caught_up.log_len
    );

    cluster.shutdown();
    Ok(())
}

#[test]
fn a_restarted_node_recovers_its_persisted_state() -> Result<()> {
    let mut cluster = TestCluster::spawn(1, 19700, fast_raft(2), true)?;

    assert_eq!(cluster.command_via_leader(set("a", "1"))?, kv("a", "1"));
    assert_eq!(cluster.command_via_leader(set("b", "2"))?, kv("b", "2"));

    cluster.kill(1);
    cluster.restart(1)?;

    // a fresh write commits in the new term and drags any unapplied tail in
    assert_eq!(cluster.command_via_leader(set("c", "3"))?, kv("c", "3"));
    cluster.wait_until("the restarted store holds all writes", |statuses| {
        statuses.len() == 1
            && ["a", "b", "c"].iter().zip(["1", "2", "3"]).all(|(k, v)| {
                statuses[0].store.get(*k).map(String::as_str) == Some(v)
            })
    })?;

    cluster.shutdown();
    Ok(())
}
