//! # peers
//!
//! why: know the cluster membership and reach each peer's raft port
//! relations: registry built from config at startup, clients used by
//! server.rs's outbound fan-out
//! what: PeerRegistry, PeerClient rpc stubs, id=addr parsing

use std::collections::BTreeMap;
use std::net::TcpStream;

use anyhow::{anyhow, bail, Context, Result};

use raft_core::{
    AppendEntriesArgs, AppendEntriesRet, InstallSnapshotArgs, InstallSnapshotRet,
    RequestVoteArgs, RequestVoteRet,
};

use crate::protocol::{read_frame, write_frame, PeerReply, PeerRequest};

/// static, ordered set of cluster members, read-only after startup
///
/// holds the raft-port address of every node in the cluster, this node
/// included; rpc stubs are handed out for the peers only.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    me: u64,
    members: BTreeMap<u64, String>,
}

impl PeerRegistry {
    /// build a registry from (id, raft_addr) pairs; `me` must be a member
    pub fn new(me: u64, members: Vec<(u64, String)>) -> Result<Self> {
        let members: BTreeMap<u64, String> = members.into_iter().collect();
        if !members.contains_key(&me) {
            bail!("node id {} missing from the peer list", me);
        }
        Ok(Self { me, members })
    }

    /// parse `id=addr` entries into (id, addr) pairs
    pub fn parse_members(entries: &[String]) -> Result<Vec<(u64, String)>> {
        let mut members = Vec::new();
        for entry in entries {
            let (id_str, addr) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid peer entry '{entry}', expected id=addr"))?;
            let id: u64 = id_str
                .parse()
                .with_context(|| format!("invalid peer id in '{entry}'"))?;
            members.push((id, addr.to_string()));
        }
        if members.is_empty() {
            bail!("at least one peer entry is required (include self)");
        }
        Ok(members)
    }

    /// every member id in ascending order, self included
    pub fn cluster_ids(&self) -> Vec<u64> {
        self.members.keys().copied().collect()
    }

    /// raft address of a member
    pub fn addr_of(&self, id: u64) -> Option<&str> {
        self.members.get(&id).map(String::as_str)
    }

    /// rpc stubs for every peer except this node
    pub fn clients(&self) -> Vec<PeerClient> {
        self.members
            .iter()
            .filter(|(&id, _)| id != self.me)
            .map(|(&id, addr)| PeerClient { id, addr: addr.clone() })
            .collect()
    }
}

/// blocking rpc stub for one peer
///
/// each call opens a fresh connection, writes the request frame, and waits
/// for the reply frame. callers run these on short-lived sender threads so
/// a slow peer never blocks the event loop.
#[derive(Debug, Clone)]
pub struct PeerClient {
    pub id: u64,
    addr: String,
}

impl PeerClient {
    fn call(&self, request: &PeerRequest) -> Result<PeerReply> {
        let mut stream = TcpStream::connect(&self.addr)
            .with_context(|| format!("connect to peer {} at {}", self.id, self.addr))?;
        write_frame(&mut stream, request)?;
        read_frame(&mut stream)
    }

    pub fn append_entries(&self, args: &AppendEntriesArgs) -> Result<AppendEntriesRet> {
        match self.call(&PeerRequest::AppendEntries(args.clone()))? {
            PeerReply::AppendEntries(ret) => Ok(ret),
            other => bail!("peer {} answered append_entries with {:?}", self.id, other),
        }
    }

    pub fn request_vote(&self, args: &RequestVoteArgs) -> Result<RequestVoteRet> {
        match self.call(&PeerRequest::RequestVote(args.clone()))? {
            PeerReply::RequestVote(ret) => Ok(ret),
            other => bail!("peer {} answered request_vote with {:?}", self.id, other),
        }
    }

    pub fn install_snapshot(&self, args: &InstallSnapshotArgs) -> Result<InstallSnapshotRet> {
        match self.call(&PeerRequest::InstallSnapshot(args.clone()))? {
            PeerReply::InstallSnapshot(ret) => Ok(ret),
            other => bail!("peer {} answered install_snapshot with {:?}", self.id, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_members_accepts_id_addr_pairs() {
        let entries = vec!["1=127.0.0.1:7001".to_string(), "2=127.0.0.1:7002".to_string()];
        let members = PeerRegistry::parse_members(&entries).unwrap();
        assert_eq!(members, vec![(1, "127.0.0.1:7001".into()), (2, "127.0.0.1:7002".into())]);
    }

    #[test]
    fn parse_members_rejects_malformed_entries() {
        assert!(PeerRegistry::parse_members(&["nonsense".to_string()]).is_err());
        assert!(PeerRegistry::parse_members(&["x=127.0.0.1:7001".to_string()]).is_err());
        assert!(PeerRegistry::parse_members(&[]).is_err());
    }

    #[test]
    fn registry_requires_self_membership() {
        let members = vec![(2, "127.0.0.1:7002".to_string())];
        assert!(PeerRegistry::new(1, members).is_err());
    }

    #[test]
    fn clients_exclude_self_and_keep_order() {
        let registry = PeerRegistry::new(
            2,
            vec![
                (3, "127.0.0.1:7003".to_string()),
                (1, "127.0.0.1:7001".to_string()),
                (2, "127.0.0.1:7002".to_string()),
            ],
        )
        .unwrap();

        assert_eq!(registry.cluster_ids(), vec![1, 2, 3]);
        let ids: Vec<u64> = registry.clients().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
