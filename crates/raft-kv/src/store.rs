//! # store
//!
//! why: hold the applied key-value state that raft replicates
//! relations: driven by server.rs's apply pump, snapshotted via raft-storage
//! what: KvStore map, the single-threaded apply contract, snapshot codec

use std::collections::HashMap;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use log::debug;

use crate::protocol::{Command, CommandResult};

/// channel a committed command's result is routed back through
pub type ReplySink = Sender<CommandResult>;

/// the in-memory key-value state machine
///
/// applied only from the event-loop thread, in log-index order, so none of
/// the operations handle races. a missing key reads as the empty string,
/// which is also what Cas compares against for absent keys.
#[derive(Debug, Default)]
pub struct KvStore {
    store: HashMap<String, String>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_internal(&self, key: &str) -> CommandResult {
        let value = self.store.get(key).cloned().unwrap_or_default();
        CommandResult::Kv { key: key.to_string(), value }
    }

    fn set_internal(&mut self, key: String, value: String) -> CommandResult {
        self.store.insert(key.clone(), value.clone());
        CommandResult::Kv { key, value }
    }

    fn clear_internal(&mut self) -> CommandResult {
        self.store = HashMap::new();
        CommandResult::Success
    }

    /// swap in `value` iff the current value equals `expected`; the reply
    /// carries the new value on success and the unchanged current value
    /// otherwise, so the caller can tell which happened
    fn cas_internal(&mut self, key: String, expected: String, value: String) -> CommandResult {
        let current = self.store.get(&key).cloned().unwrap_or_default();
        if current == expected {
            self.store.insert(key.clone(), value.clone());
            CommandResult::Kv { key, value }
        } else {
            CommandResult::Kv { key, value: current }
        }
    }

    /// apply one committed command and route the result through the sink
    ///
    /// the sink is present only on the leader that accepted the command; a
    /// missing or disconnected sink discards the result (the client times
    /// out and retries against the current leader). the send never blocks
    /// the apply loop.
    pub fn handle_command(&mut self, command: Command, sink: Option<&ReplySink>) {
        let result = match command {
            Command::Get { key } => self.get_internal(&key),
            Command::Set { key, value } => self.set_internal(key, value),
            Command::Clear => self.clear_internal(),
            Command::Cas { key, expected, value } => self.cas_internal(key, expected, value),
            // membership change is wired through the log but not acted on here
            Command::ChangeConfiguration { .. } => CommandResult::Success,
        };

        if let Some(sink) = sink {
            if sink.try_send(result).is_err() {
                debug!("kv-store applied a command but the client is gone");
            }
        }
    }

    /// number of keys currently stored
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// current value of a key, if present (local read for status probes)
    pub fn get(&self, key: &str) -> Option<&String> {
        self.store.get(key)
    }

    /// clone of the whole map for status probes
    pub fn contents(&self) -> HashMap<String, String> {
        self.store.clone()
    }

    // -- snapshot codec --

    /// serialize the full mapping as a self-describing blob
    pub fn snapshot_blob(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.store).context("encode kv snapshot")
    }

    /// replace the mapping wholesale with a decoded snapshot
    pub fn restore_blob(&mut self, blob: &[u8]) -> Result<()> {
        self.store = serde_json::from_slice(blob).context("decode kv snapshot")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn apply(store: &mut KvStore, command: Command) -> CommandResult {
        let (tx, rx) = bounded(1);
        store.handle_command(command, Some(&tx));
        rx.try_recv().expect("no reply routed")
    }

    #[test]
    fn get_missing_key_is_empty_string() {
        let mut store = KvStore::new();
        let result = apply(&mut store, Command::Get { key: "nope".into() });
        assert_eq!(result, CommandResult::Kv { key: "nope".into(), value: String::new() });
    }

    #[test]
    fn set_then_get() {
        let mut store = KvStore::new();
        apply(&mut store, Command::Set { key: "a".into(), value: "1".into() });

        let result = apply(&mut store, Command::Get { key: "a".into() });
        assert_eq!(result, CommandResult::Kv { key: "a".into(), value: "1".into() });
    }

    #[test]
    fn clear_resets_everything() {
        let mut store = KvStore::new();
        apply(&mut store, Command::Set { key: "a".into(), value: "1".into() });
        apply(&mut store, Command::Set { key: "b".into(), value: "2".into() });

        assert_eq!(apply(&mut store, Command::Clear), CommandResult::Success);
        assert!(store.is_empty());
    }

    #[test]
    fn cas_swaps_on_match_and_reports_current_on_mismatch() {
        let mut store = KvStore::new();
        apply(&mut store, Command::Set { key: "x".into(), value: "A".into() });

        // matching expectation: value becomes B, reply carries B
        let hit = apply(
            &mut store,
            Command::Cas { key: "x".into(), expected: "A".into(), value: "B".into() },
        );
        assert_eq!(hit, CommandResult::Kv { key: "x".into(), value: "B".into() });

        // stale expectation: no change, reply carries the current B
        let miss = apply(
            &mut store,
            Command::Cas { key: "x".into(), expected: "A".into(), value: "C".into() },
        );
        assert_eq!(miss, CommandResult::Kv { key: "x".into(), value: "B".into() });
        assert_eq!(store.get("x"), Some(&"B".to_string()));
    }

    #[test]
    fn cas_on_missing_key_compares_against_empty() {
        let mut store = KvStore::new();
        let result = apply(
            &mut store,
            Command::Cas { key: "new".into(), expected: String::new(), value: "v".into() },
        );
        assert_eq!(result, CommandResult::Kv { key: "new".into(), value: "v".into() });
    }

    #[test]
    fn change_configuration_is_a_noop_success() {
        let mut store = KvStore::new();
        let result = apply(
            &mut store,
            Command::ChangeConfiguration { servers: vec!["1=127.0.0.1:9000".into()] },
        );
        assert_eq!(result, CommandResult::Success);
        assert!(store.is_empty());
    }

    #[test]
    fn missing_sink_discards_the_result() {
        let mut store = KvStore::new();
        store.handle_command(Command::Set { key: "a".into(), value: "1".into() }, None);
        assert_eq!(store.get("a"), Some(&"1".to_string()));
    }

    #[test]
    fn snapshot_round_trip_restores_identical_state() {
        let mut store = KvStore::new();
        for i in 0..5 {
            apply(&mut store, Command::Set { key: format!("k{i}"), value: format!("v{i}") });
        }

        let blob = store.snapshot_blob().unwrap();

        let mut restored = KvStore::new();
        apply(&mut restored, Command::Set { key: "stale".into(), value: "gone".into() });
        restored.restore_blob(&blob).unwrap();

        assert_eq!(restored.contents(), store.contents());
        assert_eq!(restored.get("stale"), None);
    }
}
