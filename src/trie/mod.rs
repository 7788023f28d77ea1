//! Authenticated radix trie with parallel merge, bulk deletion, and
//! parallel Merkle hashing.
//!
//! Every authenticated structure in the engine (account commitments,
//! orderbooks, the modification log, the header-hash map) is one of these
//! tries. Keys in a given trie share a fixed byte length; ordering is
//! big-endian lexicographic, which is what gives orderbooks their
//! min-price-ascending iteration for free.
//!
//! The hashing contract is the load-bearing part: the root hash depends
//! only on the final set of keys and values, never on insertion order,
//! merge shape, or worker count. Unchanged subtrees keep their cached
//! hashes, so rehashing after a block touches only dirty paths.

mod node;

use crate::wire::Hash;
use crossbeam::queue::SegQueue;
use node::{to_nibbles, TrieNode};
use rayon::prelude::*;

/// Root hash of an empty trie.
pub const EMPTY_TRIE_HASH: Hash = [0u8; 32];

/// Values stored in an authenticated trie.
///
/// `merge_from` resolves key collisions during insert and merge (the
/// modification log unions entries; tries with unique keys just assert).
/// `append_hash_data` contributes the value's canonical bytes to its
/// leaf hash.
pub trait TrieValue: Send + Sync {
    /// Fold another value for the same key into this one.
    fn merge_from(&mut self, other: Self);

    /// Append the bytes this value hashes as.
    fn append_hash_data(&self, out: &mut Vec<u8>);
}

impl TrieValue for [u8; 32] {
    fn merge_from(&mut self, other: Self) {
        *self = other;
    }

    fn append_hash_data(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

/// An authenticated trie over `KL`-byte keys.
pub struct Trie<V, const KL: usize> {
    root: Option<Box<TrieNode<V>>>,
}

impl<V: TrieValue, const KL: usize> Default for Trie<V, KL> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: TrieValue, const KL: usize> Trie<V, KL> {
    /// An empty trie.
    pub fn new() -> Self {
        Trie { root: None }
    }

    /// Number of live keys (marked-for-deletion keys still count).
    pub fn len(&self) -> u64 {
        self.root.as_ref().map_or(0, |r| r.size)
    }

    /// Whether the trie holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently flagged for bulk deletion.
    pub fn marked_count(&self) -> u64 {
        self.root.as_ref().map_or(0, |r| r.marked)
    }

    /// Insert a key. If the key is present the values merge via
    /// [`TrieValue::merge_from`]; inserting over a marked key revives it.
    /// Returns true when the key was new.
    pub fn insert(&mut self, key: &[u8; KL], value: V) -> bool {
        let path = to_nibbles(key);
        match &mut self.root {
            Some(root) => root.insert(&path, value).0,
            root @ None => {
                *root = Some(Box::new(TrieNode::leaf(path, value)));
                true
            }
        }
    }

    /// Immutable lookup.
    pub fn get(&self, key: &[u8; KL]) -> Option<&V> {
        self.root.as_ref()?.get(&to_nibbles(key))
    }

    /// Mutable lookup. Hash caches along the path are invalidated, so the
    /// next [`Self::hash`] recomputes exactly the touched spine.
    pub fn get_mut(&mut self, key: &[u8; KL]) -> Option<&mut V> {
        self.root.as_mut()?.get_mut(&to_nibbles(key))
    }

    /// Remove a key immediately, returning its value.
    pub fn perform_deletion(&mut self, key: &[u8; KL]) -> Option<V> {
        let root = self.root.as_mut()?;
        let (removed, _) = root.remove(&to_nibbles(key));
        if root.size == 0 {
            self.root = None;
        }
        removed
    }

    /// Flag a key for [`Self::perform_marked_deletions`]. No structural
    /// change happens; lookups still see the key. Returns false if the key
    /// is absent or already marked.
    pub fn mark_for_deletion(&mut self, key: &[u8; KL]) -> bool {
        match &mut self.root {
            Some(root) => root.mark_for_deletion(&to_nibbles(key)),
            None => false,
        }
    }

    /// Remove every marked key, returning the removed `(key, value)` pairs
    /// in key order.
    pub fn perform_marked_deletions(&mut self) -> Vec<([u8; KL], V)> {
        let Some(root) = self.root.as_mut() else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        let mut stem = Vec::new();
        root.collect_marked(&mut stem, &mut removed);
        if root.size == 0 {
            self.root = None;
        }
        removed
            .into_iter()
            .map(|(k, v)| {
                let mut key = [0u8; KL];
                key.copy_from_slice(&k);
                (key, v)
            })
            .collect()
    }

    /// Splice another trie into this one. Disjoint subtrees link in
    /// O(shared-prefix depth); duplicate keys merge values.
    pub fn merge_in(&mut self, other: Trie<V, KL>) {
        let Some(theirs) = other.root else {
            return;
        };
        match &mut self.root {
            Some(root) => root.merge_from_node(theirs),
            root @ None => *root = Some(theirs),
        }
    }

    /// In-order traversal over `(key, value)`.
    pub fn for_each<F: FnMut(&[u8; KL], &V)>(&self, mut f: F) {
        if let Some(root) = &self.root {
            let mut stem = Vec::new();
            root.visit(&mut stem, &mut |key_bytes, v| {
                let mut key = [0u8; KL];
                key.copy_from_slice(key_bytes);
                f(&key, v);
            });
        }
    }

    /// In-order traversal that stops when `f` returns false.
    pub fn for_each_while<F: FnMut(&[u8; KL], &V) -> bool>(&self, mut f: F) {
        if let Some(root) = &self.root {
            let mut stem = Vec::new();
            root.visit_while(&mut stem, &mut |key_bytes, v| {
                let mut key = [0u8; KL];
                key.copy_from_slice(key_bytes);
                f(&key, v)
            });
        }
    }

    /// Collect keys in order; mostly for tests and thunk construction.
    pub fn keys(&self) -> Vec<[u8; KL]> {
        let mut out = Vec::with_capacity(self.len() as usize);
        self.for_each(|k, _| out.push(*k));
        out
    }

    /// Apply `f` to every `(key, value)` with subtree-level parallelism.
    /// Visit order is unspecified.
    pub fn par_for_each<F>(&self, f: F)
    where
        F: Fn(&[u8; KL], &V) + Send + Sync,
    {
        fn walk<'a, V: TrieValue, F>(node: &'a TrieNode<V>, stem: Vec<u8>, f: &F)
        where
            F: Fn(&[u8], &'a V) + Send + Sync,
        {
            let mut path = stem;
            path.extend_from_slice(&node.prefix);
            if let Some(v) = &node.value {
                f(&node::from_nibbles(&path), v);
            }
            let live: Vec<(usize, &TrieNode<V>)> = node
                .children
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.as_deref().map(|c| (i, c)))
                .collect();
            if live.len() > 1 {
                live.into_par_iter().for_each(|(idx, child)| {
                    let mut child_stem = path.clone();
                    child_stem.push(idx as u8);
                    walk(child, child_stem, f);
                });
            } else {
                for (idx, child) in live {
                    let mut child_stem = path.clone();
                    child_stem.push(idx as u8);
                    walk(child, child_stem, f);
                }
            }
        }

        if let Some(root) = &self.root {
            walk(root, Vec::new(), &|key_bytes: &[u8], v| {
                let mut key = [0u8; KL];
                key.copy_from_slice(key_bytes);
                f(&key, v);
            });
        }
    }

    /// Root hash. Cached subtree hashes are reused; dirty subtrees are
    /// recomputed in parallel. The result depends only on the key/value
    /// set, never on how it was built.
    pub fn hash(&mut self) -> Hash {
        match &mut self.root {
            Some(root) => root.compute_hash(),
            None => EMPTY_TRIE_HASH,
        }
    }

    /// Drop every key.
    pub fn clear(&mut self) {
        self.root = None;
    }
}

/// A pool of worker-local tries feeding one canonical trie.
///
/// Workers take a trie, insert into it without any locking, and hand it
/// back; [`TrieCache::merge_into`] splices everything into the canonical
/// trie with a parallel pairwise reduction.
pub struct TrieCache<V, const KL: usize> {
    pool: SegQueue<Trie<V, KL>>,
}

impl<V: TrieValue, const KL: usize> Default for TrieCache<V, KL> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: TrieValue, const KL: usize> TrieCache<V, KL> {
    /// An empty cache.
    pub fn new() -> Self {
        TrieCache {
            pool: SegQueue::new(),
        }
    }

    /// Check out a local trie (a fresh one if the pool is dry).
    pub fn take(&self) -> Trie<V, KL> {
        self.pool.pop().unwrap_or_default()
    }

    /// Return a local trie after filling it.
    pub fn give_back(&self, trie: Trie<V, KL>) {
        self.pool.push(trie);
    }

    /// Detach every pooled trie that holds keys.
    pub fn drain(&self) -> Vec<Trie<V, KL>> {
        let mut locals = Vec::new();
        while let Some(t) = self.pool.pop() {
            if !t.is_empty() {
                locals.push(t);
            }
        }
        locals
    }

    /// Drain the pool and splice everything into `main`. Locals are merged
    /// pairwise in parallel first, then linked into the canonical trie.
    pub fn merge_into(&self, main: &mut Trie<V, KL>)
    where
        V: 'static,
    {
        let locals = self.drain();
        if locals.is_empty() {
            return;
        }
        let merged = locals
            .into_par_iter()
            .reduce(Trie::new, |mut a, b| {
                a.merge_in(b);
                a
            });
        main.merge_in(merged);
    }
}
