//! Recently-searched peers collaborator.
//!
//! Persistence lives outside this crate; the aggregator only issues
//! list/add/remove/clear calls. The in-memory implementation backs tests
//! and hosts without a persistence layer.

use std::sync::Mutex;

use crate::protocol::{PeerId, PeerRecord};

/// External store of recently-searched peers, most recent first.
pub trait RecentSearchStore: Send + Sync {
    fn list(&self) -> Vec<PeerRecord>;
    fn add(&self, peer: PeerRecord);
    fn remove(&self, peer: PeerId);
    fn clear(&self);
}

/// Volatile recent-search store.
pub struct MemoryRecentSearches {
    peers: Mutex<Vec<PeerRecord>>,
}

impl MemoryRecentSearches {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_peers(peers: Vec<PeerRecord>) -> Self {
        Self {
            peers: Mutex::new(peers),
        }
    }
}

impl Default for MemoryRecentSearches {
    fn default() -> Self {
        Self::new()
    }
}

impl RecentSearchStore for MemoryRecentSearches {
    fn list(&self) -> Vec<PeerRecord> {
        self.peers.lock().expect("recent store poisoned").clone()
    }

    fn add(&self, peer: PeerRecord) {
        let mut peers = self.peers.lock().expect("recent store poisoned");
        peers.retain(|existing| existing.id != peer.id);
        peers.insert(0, peer);
    }

    fn remove(&self, peer: PeerId) {
        self.peers
            .lock()
            .expect("recent store poisoned")
            .retain(|existing| existing.id != peer);
    }

    fn clear(&self) {
        self.peers.lock().expect("recent store poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PeerKind;

    fn peer(id: i64, name: &str) -> PeerRecord {
        PeerRecord {
            id: PeerId(id),
            name: name.to_string(),
            handle: None,
            kind: PeerKind::User,
            subscribers: None,
        }
    }

    #[test]
    fn test_add_moves_existing_peer_to_front() {
        let store = MemoryRecentSearches::new();
        store.add(peer(1, "a"));
        store.add(peer(2, "b"));
        store.add(peer(1, "a"));

        let ids: Vec<i64> = store.list().iter().map(|p| p.id.0).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_remove_and_clear() {
        let store = MemoryRecentSearches::new();
        store.add(peer(1, "a"));
        store.add(peer(2, "b"));

        store.remove(PeerId(1));
        assert_eq!(store.list().len(), 1);

        store.clear();
        assert!(store.list().is_empty());
    }
}
