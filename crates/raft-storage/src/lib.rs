//! # raft-storage
//!
//! why: provide durable persistence for raft state using standard rust fs apis
//! relations: used by raft-kv's event loop for crash recovery
//! what: Persister trait with two blob slots, FilePersister, MemoryPersister,
//! PersistedState codec

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;

use raft_core::LogEntry;

/// trait for durable storage of the two raft blobs
///
/// two named slots, each an opaque byte blob:
/// - `raft_state` holds (current_term, voted_for, log)
/// - `snapshot` holds the serialized state machine
///
/// each save must be atomic and durable before returning; readers observe
/// the most recently completed write. implementations:
/// - real filesystem (native)
/// - in-memory (testing, in-process clusters)
pub trait Persister: Send {
    /// overwrite the raft_state slot
    fn save_raft_state(&mut self, blob: &[u8]) -> io::Result<()>;

    /// load the raft_state slot (None before the first save)
    fn read_raft_state(&self) -> io::Result<Option<Vec<u8>>>;

    /// overwrite the snapshot slot
    fn save_snapshot(&mut self, blob: &[u8]) -> io::Result<()>;

    /// load the snapshot slot (None before the first save)
    fn read_snapshot(&self) -> io::Result<Option<Vec<u8>>>;

    /// size in bytes of the snapshot slot (0 before the first save)
    fn snapshot_size(&self) -> usize;
}

/// the raft_state blob contents
///
/// json keeps the blob self-describing, so fields can be added without
/// breaking older state files.
#[derive(serde::Serialize, serde::Deserialize, Debug, Default)]
pub struct PersistedState {
    pub current_term: u64,
    pub voted_for: Option<u64>,
    pub log: Vec<LogEntry>,
}

impl PersistedState {
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn decode(blob: &[u8]) -> io::Result<Self> {
        serde_json::from_slice(blob).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

// -- file persister implementation --

/// file-based persister using std::fs
///
/// stores the two slots in a directory:
/// - raft_state.json: term, vote, and log
/// - snapshot.json: state machine contents
pub struct FilePersister {
    /// directory path for storing the slot files
    dir: PathBuf,
}

impl FilePersister {
    /// create a new persister at the given directory
    /// creates the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join("raft_state.json")
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join("snapshot.json")
    }

    /// atomic write: write to temp file, sync, then rename over the slot
    fn write_slot(&self, name: &str, target: PathBuf, blob: &[u8]) -> io::Result<()> {
        let temp_path = self.dir.join(name);
        let mut file = File::create(&temp_path)?;
        file.write_all(blob)?;
        file.sync_all()?;
        fs::rename(&temp_path, target)?;
        Ok(())
    }

    fn read_slot(path: PathBuf) -> io::Result<Option<Vec<u8>>> {
        if !path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&path)?;
        let mut blob = Vec::new();
        file.read_to_end(&mut blob)?;
        Ok(Some(blob))
    }
}

impl Persister for FilePersister {
    fn save_raft_state(&mut self, blob: &[u8]) -> io::Result<()> {
        self.write_slot("raft_state.tmp", self.state_path(), blob)
    }

    fn read_raft_state(&self) -> io::Result<Option<Vec<u8>>> {
        Self::read_slot(self.state_path())
    }

    fn save_snapshot(&mut self, blob: &[u8]) -> io::Result<()> {
        self.write_slot("snapshot.tmp", self.snapshot_path(), blob)
    }

    fn read_snapshot(&self) -> io::Result<Option<Vec<u8>>> {
        Self::read_slot(self.snapshot_path())
    }

    fn snapshot_size(&self) -> usize {
        fs::metadata(self.snapshot_path())
            .map(|m| m.len() as usize)
            .unwrap_or(0)
    }
}

// -- in-memory persister implementation --

/// in-memory persister for tests and in-process clusters
///
/// stores both slots in memory, no persistence across process restarts
#[derive(Default)]
pub struct MemoryPersister {
    raft_state: Option<Vec<u8>>,
    snapshot: Option<Vec<u8>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persister for MemoryPersister {
    fn save_raft_state(&mut self, blob: &[u8]) -> io::Result<()> {
        self.raft_state = Some(blob.to_vec());
        Ok(())
    }

    fn read_raft_state(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.raft_state.clone())
    }

    fn save_snapshot(&mut self, blob: &[u8]) -> io::Result<()> {
        self.snapshot = Some(blob.to_vec());
        Ok(())
    }

    fn read_snapshot(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.snapshot.clone())
    }

    fn snapshot_size(&self) -> usize {
        self.snapshot.as_ref().map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_persister_round_trips_both_slots() {
        let mut p = MemoryPersister::new();

        p.save_raft_state(b"state").unwrap();
        p.save_snapshot(b"snapshot").unwrap();

        assert_eq!(p.read_raft_state().unwrap().unwrap(), b"state");
        assert_eq!(p.read_snapshot().unwrap().unwrap(), b"snapshot");
        assert_eq!(p.snapshot_size(), 8);
    }

    #[test]
    fn file_persister_survives_reopen() {
        let dir = tempdir().unwrap();

        {
            let mut p = FilePersister::new(dir.path()).unwrap();
            p.save_raft_state(b"durable").unwrap();
        }

        let p = FilePersister::new(dir.path()).unwrap();
        assert_eq!(p.read_raft_state().unwrap().unwrap(), b"durable");
    }

    #[test]
    fn persisted_state_codec_round_trips() {
        let state = PersistedState {
            current_term: 7,
            voted_for: Some(2),
            log: vec![LogEntry::sentinel(0, 0), LogEntry::new(7, 1, b"cmd".to_vec())],
        };

        let blob = state.encode().unwrap();
        let decoded = PersistedState::decode(&blob).unwrap();

        assert_eq!(decoded.current_term, 7);
        assert_eq!(decoded.voted_for, Some(2));
        assert_eq!(decoded.log, state.log);
    }
}
