//! # protocol
//!
//! why: define the commands replicated through the log and the wire framing
//! relations: commands are applied by store.rs, frames carried by peers.rs
//! and the listener shims in server.rs
//! what: Command, CommandResult, peer rpc envelopes, length-prefixed framing

use std::io::{Read, Write};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use raft_core::{
    AppendEntriesArgs, AppendEntriesRet, InstallSnapshotArgs, InstallSnapshotRet,
    RequestVoteArgs, RequestVoteRet,
};

/// Commands that flow through the replicated log.
///
/// Reads go through the log too: a Get is committed like any other command
/// so its answer reflects everything ordered before it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String },
    Clear,
    /// set `key` to `value` only if its current value equals `expected`
    Cas { key: String, expected: String, value: String },
    /// accepted into the log but applied as a no-op; membership change is
    /// not implemented beyond the command plumbing
    ChangeConfiguration { servers: Vec<String> },
}

impl Command {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("encode command")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("decode command")
    }
}

/// What a client gets back for a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandResult {
    /// this node is not the leader; retry against `leader`
    Redirect { leader: u64 },
    /// key/value answer for Get, Set, and Cas (for Cas, value equals the
    /// requested new value iff the swap happened)
    Kv { key: String, value: String },
    Success,
    Failure { message: String },
}

/// request envelope on the peer port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerRequest {
    AppendEntries(AppendEntriesArgs),
    RequestVote(RequestVoteArgs),
    InstallSnapshot(InstallSnapshotArgs),
}

/// reply envelope on the peer port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerReply {
    AppendEntries(AppendEntriesRet),
    RequestVote(RequestVoteRet),
    InstallSnapshot(InstallSnapshotRet),
}

// -- framing --
//
// every message is a 4-byte big-endian length followed by a bincode body;
// one request/reply exchange per connection.

pub fn write_frame<T: Serialize>(writer: &mut impl Write, msg: &T) -> Result<()> {
    let body = bincode::serialize(msg).context("serialize frame")?;
    let len = u32::try_from(body.len()).context("frame too large")?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<T: DeserializeOwned>(reader: &mut impl Read) -> Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    bincode::deserialize(&body).context("deserialize frame")
}

/// blocking client for the kv port
///
/// opens one connection per command, writes the request frame, and waits
/// for the result frame.
pub struct KvClient {
    addr: String,
}

impl KvClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn call(&self, command: &Command) -> Result<CommandResult> {
        let mut stream = std::net::TcpStream::connect(&self.addr)
            .with_context(|| format!("connect to {}", self.addr))?;
        write_frame(&mut stream, command)?;
        read_frame(&mut stream)
    }

    pub fn get(&self, key: &str) -> Result<CommandResult> {
        self.call(&Command::Get { key: key.to_string() })
    }

    pub fn set(&self, key: &str, value: &str) -> Result<CommandResult> {
        self.call(&Command::Set { key: key.to_string(), value: value.to_string() })
    }

    pub fn cas(&self, key: &str, expected: &str, value: &str) -> Result<CommandResult> {
        self.call(&Command::Cas {
            key: key.to_string(),
            expected: expected.to_string(),
            value: value.to_string(),
        })
    }

    pub fn clear(&self) -> Result<CommandResult> {
        self.call(&Command::Clear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codec_round_trips() {
        let cmd = Command::Cas {
            key: "k".to_string(),
            expected: "a".to_string(),
            value: "b".to_string(),
        };

        let bytes = cmd.encode().unwrap();
        let decoded = Command::decode(&bytes).unwrap();

        match decoded {
            Command::Cas { key, expected, value } => {
                assert_eq!(key, "k");
                assert_eq!(expected, "a");
                assert_eq!(value, "b");
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(Command::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn frames_round_trip_over_a_buffer() {
        let mut buf = Vec::new();
        let req = PeerRequest::RequestVote(RequestVoteArgs {
            term: 3,
            candidate_id: 1,
            last_log_index: 5,
            last_log_term: 2,
        });

        write_frame(&mut buf, &req).unwrap();
        let decoded: PeerRequest = read_frame(&mut &buf[..]).unwrap();

        match decoded {
            PeerRequest::RequestVote(args) => {
                assert_eq!(args.term, 3);
                assert_eq!(args.last_log_index, 5);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
