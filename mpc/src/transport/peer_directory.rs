//! Copy-on-write peer directory, updated on handshake and read on every send.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::PartyId;

/// What the directory knows about one peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    pub network_address: String,
    pub blockchain_address: String,
}

/// A `party_id -> PeerInfo` map that readers see as an atomic snapshot.
///
/// Writers build a new map from the old one and swap it in; readers clone
/// the (cheap, `Arc`-backed) current map rather than taking a lock across
/// their whole operation, so a concurrent send always sees a consistent
/// directory even while a handshake is in flight.
pub struct PeerDirectory {
    current: RwLock<std::sync::Arc<HashMap<PartyId, PeerInfo>>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        PeerDirectory {
            current: RwLock::new(std::sync::Arc::new(HashMap::new())),
        }
    }

    /// An immutable snapshot of the directory as of this call.
    pub fn snapshot(&self) -> std::sync::Arc<HashMap<PartyId, PeerInfo>> {
        self.current.read().expect("peer directory poisoned").clone()
    }

    pub fn get(&self, party_id: PartyId) -> Option<PeerInfo> {
        self.snapshot().get(&party_id).cloned()
    }

    /// Record (or overwrite) what's known about `party_id`.
    pub fn update(&self, party_id: PartyId, info: PeerInfo) {
        let mut guard = self.current.write().expect("peer directory poisoned");
        let mut next = (**guard).clone();
        next.insert(party_id, info);
        *guard = std::sync::Arc::new(next);
    }
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_then_get_round_trips() {
        let directory = PeerDirectory::new();
        directory.update(
            1,
            PeerInfo {
                network_address: "127.0.0.1:9001".to_string(),
                blockchain_address: "0xabc".to_string(),
            },
        );
        assert_eq!(
            directory.get(1).unwrap().blockchain_address,
            "0xabc".to_string()
        );
        assert!(directory.get(2).is_none());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_updates() {
        let directory = PeerDirectory::new();
        directory.update(
            0,
            PeerInfo {
                network_address: "a".to_string(),
                blockchain_address: "0x1".to_string(),
            },
        );
        let snapshot = directory.snapshot();
        directory.update(
            0,
            PeerInfo {
                network_address: "a".to_string(),
                blockchain_address: "0x2".to_string(),
            },
        );
        assert_eq!(snapshot.get(&0).unwrap().blockchain_address, "0x1");
        assert_eq!(directory.get(0).unwrap().blockchain_address, "0x2");
    }
}
