use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::key::PublicKey;

/// A chatterer currently reachable at `addr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub addr: SocketAddr,
    pub username: String,
    pub public_key: PublicKey,
}

impl Peer {
    pub fn new(addr: SocketAddr, username: impl Into<String>, public_key: PublicKey) -> Self {
        Self {
            addr,
            username: username.into(),
            public_key,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.addr)
    }
}

/// Registry of reachable peers keyed by username.
///
/// The lock only guards the map operation itself; callers get clones.
#[derive(Debug, Default)]
pub struct PeerPool {
    peers: Mutex<HashMap<String, Peer>>,
}

impl PeerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `peer.username`.
    pub fn set(&self, peer: Peer) {
        self.peers.lock().insert(peer.username.clone(), peer);
    }

    pub fn get(&self, username: &str) -> Option<Peer> {
        self.peers.lock().get(username).cloned()
    }

    pub fn delete(&self, username: &str) -> Option<Peer> {
        self.peers.lock().remove(username)
    }

    /// Snapshot ordered by username.
    pub fn list(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.lock().values().cloned().collect();
        peers.sort_by(|a, b| a.username.cmp(&b.username));
        peers
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn peer(username: &str, port: u16) -> Peer {
        Peer::new(
            SocketAddr::from(([127, 0, 0, 1], port)),
            username,
            fixtures::first().public.clone(),
        )
    }

    #[test]
    fn set_get_delete_list() {
        let pool = PeerPool::new();
        assert!(pool.is_empty());

        pool.set(peer("bob", 4001));
        pool.set(peer("alice", 4000));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get("alice").unwrap().addr.port(), 4000);
        assert!(pool.get("carol").is_none());

        let names: Vec<_> = pool.list().into_iter().map(|p| p.username).collect();
        assert_eq!(names, ["alice", "bob"]);

        assert_eq!(pool.delete("alice").unwrap().username, "alice");
        assert!(pool.delete("alice").is_none());
        assert!(pool.get("alice").is_none());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn set_replaces_same_username() {
        let pool = PeerPool::new();
        pool.set(peer("alice", 4000));
        pool.set(peer("alice", 5000));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get("alice").unwrap().addr.port(), 5000);
    }

    #[test]
    fn concurrent_writers() {
        let pool = std::sync::Arc::new(PeerPool::new());
        let handles: Vec<_> = (0..8u16)
            .map(|i| {
                let pool = std::sync::Arc::clone(&pool);
                std::thread::spawn(move || {
                    let p = peer(&format!("peer-{i}"), 4000 + i);
                    pool.set(p.clone());
                    assert_eq!(pool.get(&p.username), Some(p));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.len(), 8);
    }

    #[test]
    fn json_carries_address_as_text() {
        let value = serde_json::to_value(peer("alice", 4000)).unwrap();
        assert_eq!(value["addr"], "127.0.0.1:4000");
        assert_eq!(value["username"], "alice");
        let back: Peer = serde_json::from_value(value).unwrap();
        assert_eq!(back, peer("alice", 4000));
    }
}
