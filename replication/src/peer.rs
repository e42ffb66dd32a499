//! Known peer nodes. One directory instance is shared by every component
//! that talks to peers.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shardex_core::PeerId;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub hostname: String,
    pub port: u16,
    pub shard_id: u16,
}

impl Peer {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.hostname, self.port)
    }

    fn same_address(&self, other: &Peer) -> bool {
        self.hostname.eq_ignore_ascii_case(&other.hostname) && self.port == other.port
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.hostname, self.port)
    }
}

pub struct PeerDirectory {
    local: Peer,
    peers: RwLock<Vec<Peer>>,
}

impl PeerDirectory {
    pub fn new(local: Peer) -> Self {
        Self { local, peers: RwLock::new(Vec::new()) }
    }

    /// Descriptor of this node, as advertised to peers.
    pub fn local(&self) -> &Peer {
        &self.local
    }

    /// Idempotent by id and by (hostname, port); never adds the local node.
    /// Returns whether the peer was new.
    pub fn add_peer(&self, peer: Peer) -> bool {
        if peer.id == self.local.id || peer.same_address(&self.local) {
            return false;
        }
        let mut peers = self.peers.write();
        if peers.iter().any(|p| p.id == peer.id || p.same_address(&peer)) {
            return false;
        }
        tracing::info!(peer = %peer, shard = peer.shard_id, "peer added");
        peers.push(peer);
        true
    }

    /// Add every unknown peer; returns how many were new.
    pub fn merge(&self, peers: impl IntoIterator<Item = Peer>) -> usize {
        peers.into_iter().filter(|p| self.add_peer(p.clone())).count()
    }

    pub fn remove_peer(&self, id: &PeerId) -> Option<Peer> {
        let mut peers = self.peers.write();
        let pos = peers.iter().position(|p| &p.id == id)?;
        Some(peers.remove(pos))
    }

    pub fn get(&self, id: &PeerId) -> Option<Peer> {
        self.peers.read().iter().find(|p| &p.id == id).cloned()
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.peers.read().clone()
    }

    /// Peers replicating the same shard as this node.
    pub fn shard_peers(&self) -> Vec<Peer> {
        self.peers
            .read()
            .iter()
            .filter(|p| p.shard_id == self.local.shard_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, host: &str, port: u16, shard: u16) -> Peer {
        Peer { id: PeerId::new(id), hostname: host.into(), port, shard_id: shard }
    }

    #[test]
    fn add_is_idempotent_by_id_and_address() {
        let dir = PeerDirectory::new(peer("me", "localhost", 9000, 1));
        assert!(dir.add_peer(peer("a", "10.0.0.1", 9000, 1)));
        assert!(!dir.add_peer(peer("a", "10.0.0.9", 9001, 1)));
        assert!(!dir.add_peer(peer("b", "10.0.0.1", 9000, 1)));
        assert!(!dir.add_peer(peer("me", "elsewhere", 1, 1)));
        assert!(!dir.add_peer(peer("alias", "LOCALHOST", 9000, 1)));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn shard_peers_filters_other_shards() {
        let dir = PeerDirectory::new(peer("me", "localhost", 9000, 1));
        dir.merge(vec![peer("a", "h1", 1, 1), peer("b", "h2", 1, 2)]);
        let ids: Vec<String> = dir.shard_peers().into_iter().map(|p| p.id.to_string()).collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(dir.peers().len(), 2);
    }

    #[test]
    fn remove_returns_the_peer() {
        let dir = PeerDirectory::new(peer("me", "localhost", 9000, 1));
        dir.add_peer(peer("a", "h1", 1, 1));
        assert_eq!(dir.remove_peer(&PeerId::new("a")).map(|p| p.port), Some(1));
        assert!(dir.remove_peer(&PeerId::new("a")).is_none());
        assert!(dir.is_empty());
    }
}
