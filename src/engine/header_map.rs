//! Round -> header-hash trie for chain-continuity checks.

use crate::trie::Trie;
use crate::wire::{Hash, Round};
use std::sync::Mutex;

/// Authenticated map from round number to that round's header hash.
///
/// The root enters every header (covering all earlier rounds), so chain
/// continuity is itself committed to. Inserts for uncommitted rounds are
/// tracked so a rewind can trim them again.
pub struct HeaderHashMap {
    trie: Mutex<Trie<Hash, 8>>,
    /// Inserts not yet handed to persistence, oldest first.
    pending: Mutex<Vec<(Round, Hash)>>,
}

impl HeaderHashMap {
    /// An empty map.
    pub fn new() -> Self {
        HeaderHashMap {
            trie: Mutex::new(Trie::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Record a produced (or validated) block's hash.
    pub fn insert_for_production(&self, round: Round, hash: Hash) {
        self.trie.lock().unwrap().insert(&round.to_be_bytes(), hash);
        self.pending.lock().unwrap().push((round, hash));
    }

    /// The hash recorded for a round.
    pub fn get(&self, round: Round) -> Option<Hash> {
        self.trie.lock().unwrap().get(&round.to_be_bytes()).copied()
    }

    /// Root hash over every recorded round.
    pub fn hash(&self) -> Hash {
        self.trie.lock().unwrap().hash()
    }

    /// Number of recorded rounds.
    pub fn size(&self) -> u64 {
        self.trie.lock().unwrap().len()
    }

    /// Remove every entry above `round` (consensus rewind).
    pub fn rollback_to_committed_round(&self, round: Round) {
        let mut trie = self.trie.lock().unwrap();
        let doomed: Vec<[u8; 8]> = {
            let mut keys = Vec::new();
            trie.for_each(|key, _| {
                if u64::from_be_bytes(*key) > round {
                    keys.push(*key);
                }
            });
            keys
        };
        for key in doomed {
            trie.perform_deletion(&key);
        }
        self.pending.lock().unwrap().retain(|(r, _)| *r <= round);
    }

    /// Detach pending entries with `round <= max_round` for persistence.
    pub fn take_pending(&self, max_round: Round) -> Vec<(Round, Hash)> {
        let mut pending = self.pending.lock().unwrap();
        let keep = pending
            .iter()
            .position(|(r, _)| *r > max_round)
            .unwrap_or(pending.len());
        pending.drain(..keep).collect()
    }

    /// Reinstall a persisted entry during reload (not re-pended).
    pub fn install_loaded(&self, round: Round, hash: Hash) {
        self.trie.lock().unwrap().insert(&round.to_be_bytes(), hash);
    }

    /// Drop everything (rewind/reload path only).
    pub fn clear_all(&self) {
        self.trie.lock().unwrap().clear();
        self.pending.lock().unwrap().clear();
    }
}

impl Default for HeaderHashMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_rollback() {
        let map = HeaderHashMap::new();
        for round in 1..=5u64 {
            map.insert_for_production(round, [round as u8; 32]);
        }
        let h5 = map.hash();
        map.rollback_to_committed_round(3);
        assert_eq!(map.size(), 3);
        assert!(map.get(4).is_none());
        assert_ne!(map.hash(), h5);

        let rebuilt = HeaderHashMap::new();
        for round in 1..=3u64 {
            rebuilt.insert_for_production(round, [round as u8; 32]);
        }
        assert_eq!(map.hash(), rebuilt.hash());
    }

    #[test]
    fn test_take_pending_in_round_order() {
        let map = HeaderHashMap::new();
        for round in 1..=4u64 {
            map.insert_for_production(round, [round as u8; 32]);
        }
        let first = map.take_pending(2);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].0, 1);
        let rest = map.take_pending(10);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].0, 3);
        assert!(map.take_pending(10).is_empty());
    }
}
