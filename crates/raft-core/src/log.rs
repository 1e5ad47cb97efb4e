//! # log
//!
//! why: manage the replicated log of commands, including snapshot compaction
//! relations: used by node.rs for replication, persisted via raft-storage
//! what: LogEntry struct, RaftLog container with sentinel anchoring

use serde::{Deserialize, Serialize};

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: u64,
    /// The index of this entry in the log (1-indexed)
    pub index: u64,
    /// The command to be applied to the state machine (empty for sentinels)
    pub command: Vec<u8>,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(term: u64, index: u64, command: Vec<u8>) -> Self {
        Self { term, index, command }
    }

    /// Create a sentinel entry carrying no command
    ///
    /// Sentinels anchor prev_log_index/prev_log_term queries at the snapshot
    /// boundary. The boot sentinel is (0, 0).
    pub fn sentinel(term: u64, index: u64) -> Self {
        Self { term, index, command: Vec::new() }
    }

    /// whether this entry is a sentinel (carries no command)
    pub fn is_sentinel(&self) -> bool {
        self.command.is_empty()
    }
}

/// the replicated log
///
/// the first entry is always a sentinel: (0, 0) at boot, or the
/// (term, index) of the last entry covered by the latest snapshot after
/// compaction. entry indices form a contiguous run starting at the
/// sentinel's index, so lookups translate a log index into a vec offset.
#[derive(Debug, Clone)]
pub struct RaftLog {
    entries: Vec<LogEntry>,
}

impl Default for RaftLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RaftLog {
    /// create a fresh log holding only the boot sentinel
    pub fn new() -> Self {
        Self { entries: vec![LogEntry::sentinel(0, 0)] }
    }

    /// rebuild a log from persisted entries
    ///
    /// an empty slice yields a fresh boot log; otherwise the first persisted
    /// entry is expected to be the sentinel written at persist time.
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        if entries.is_empty() {
            Self::new()
        } else {
            Self { entries }
        }
    }

    /// the sentinel entry (snapshot pointer once a snapshot has been taken)
    pub fn sentinel(&self) -> &LogEntry {
        &self.entries[0]
    }

    /// index of the first entry held (the sentinel's index)
    pub fn first_index(&self) -> u64 {
        self.entries[0].index
    }

    /// index of the last entry held
    pub fn last_index(&self) -> u64 {
        self.entries[self.entries.len() - 1].index
    }

    /// term of the last entry held
    pub fn last_term(&self) -> u64 {
        self.entries[self.entries.len() - 1].term
    }

    /// number of entries held, sentinel included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// a log always holds at least its sentinel
    pub fn is_empty(&self) -> bool {
        false
    }

    /// all entries held, sentinel first (for persistence)
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// get the entry at a log index, if it is still held
    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        if index < self.first_index() || index > self.last_index() {
            return None;
        }
        Some(&self.entries[(index - self.first_index()) as usize])
    }

    /// term of the entry at a log index (None if compacted away or absent)
    pub fn term_at(&self, index: u64) -> Option<u64> {
        self.get(index).map(|e| e.term)
    }

    /// entries from the given index through the end of the log
    ///
    /// `from` must be past the sentinel; asking for the suffix just past the
    /// end yields an empty slice (a heartbeat).
    pub fn entries_from(&self, from: u64) -> &[LogEntry] {
        debug_assert!(from > self.first_index());
        let offset = (from - self.first_index()) as usize;
        &self.entries[offset.min(self.entries.len())..]
    }

    /// append one entry at the tail
    pub fn append(&mut self, entry: LogEntry) {
        debug_assert_eq!(entry.index, self.last_index() + 1);
        self.entries.push(entry);
    }

    /// drop the entry at `from` and everything after it
    ///
    /// the sentinel is never removed; truncating at or below it is a bug in
    /// the caller's consistency check.
    pub fn truncate_from(&mut self, from: u64) {
        debug_assert!(from > self.first_index());
        if from > self.last_index() {
            return;
        }
        let offset = (from - self.first_index()) as usize;
        self.entries.truncate(offset);
    }

    /// compact the log up through `index`, leaving a sentinel there
    ///
    /// compacting to an index at or below the current sentinel is a no-op,
    /// which makes repeated compaction idempotent. returns whether the log
    /// changed.
    pub fn compact_to(&mut self, index: u64) -> bool {
        if index <= self.first_index() || index > self.last_index() {
            return false;
        }
        let term = self.entries[(index - self.first_index()) as usize].term;
        self.entries.drain(..(index - self.first_index()) as usize);
        self.entries[0] = LogEntry::sentinel(term, index);
        true
    }

    /// replace the whole log with a single sentinel (snapshot installation)
    pub fn reset_to(&mut self, term: u64, index: u64) {
        self.entries = vec![LogEntry::sentinel(term, index)];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: u64, index: u64) -> LogEntry {
        LogEntry::new(term, index, vec![index as u8])
    }

    #[test]
    fn fresh_log_holds_boot_sentinel() {
        let log = RaftLog::new();
        assert_eq!(log.first_index(), 0);
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);
        assert!(log.sentinel().is_sentinel());
    }

    #[test]
    fn append_and_lookup() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(1, 2));

        assert_eq!(log.last_index(), 2);
        assert_eq!(log.term_at(1), Some(1));
        assert_eq!(log.get(2).unwrap().command, vec![2]);
        assert_eq!(log.term_at(3), None);
    }

    #[test]
    fn entries_from_yields_suffix() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(1, 2));
        log.append(entry(2, 3));

        let suffix = log.entries_from(2);
        assert_eq!(suffix.len(), 2);
        assert_eq!(suffix[0].index, 2);

        // one past the end is an empty heartbeat suffix
        assert!(log.entries_from(4).is_empty());
    }

    #[test]
    fn truncate_drops_tail() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(1, 2));
        log.append(entry(1, 3));

        log.truncate_from(2);

        assert_eq!(log.last_index(), 1);
        assert_eq!(log.term_at(2), None);
    }

    #[test]
    fn compaction_installs_sentinel() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(2, 2));
        log.append(entry(2, 3));

        assert!(log.compact_to(2));

        assert_eq!(log.first_index(), 2);
        assert_eq!(log.sentinel().term, 2);
        assert!(log.sentinel().is_sentinel());
        assert_eq!(log.term_at(1), None);
        assert_eq!(log.term_at(2), Some(2));
        assert_eq!(log.get(3).unwrap().command, vec![3]);
    }

    #[test]
    fn compaction_is_idempotent() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(1, 2));
        log.append(entry(1, 3));

        assert!(log.compact_to(2));
        let before = log.entries().to_vec();

        assert!(!log.compact_to(2));
        assert!(!log.compact_to(1));
        assert_eq!(log.entries(), &before[..]);
    }

    #[test]
    fn reset_to_replaces_everything() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(1, 2));

        log.reset_to(3, 10);

        assert_eq!(log.len(), 1);
        assert_eq!(log.first_index(), 10);
        assert_eq!(log.last_index(), 10);
        assert_eq!(log.last_term(), 3);
    }
}
