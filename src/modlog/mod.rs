//! The per-round modification log: a trie over dirty account ids.
//!
//! Workers write into thread-local logs checked out from a recycling
//! cache; a background worker (or the seal path) splices them into the
//! canonical trie. The log drives every per-block enumeration: which
//! accounts to commit, which commitments to rewrite, which transactions
//! form the canonical block body.

mod worker;

pub use worker::LogMergeWorker;

use crate::trie::{Trie, TrieCache, TrieValue};
use crate::wire::{AccountId, Hash, SignedTransaction};
use either::Either;
use std::sync::Mutex;

/// Detailed per-account record: which transactions touched the account.
#[derive(Debug, Default, Clone)]
pub struct DetailedRecord {
    /// Transactions with this account as source, accepted this round,
    /// keyed and ordered by sequence number.
    pub new_txs: Vec<SignedTransaction>,
    /// Operation identifiers (`tx seqno + op index`) that modified this
    /// account, deduplicated and sorted.
    pub op_ids: Vec<u64>,
}

impl DetailedRecord {
    fn normalize(&mut self) {
        self.op_ids.sort_unstable();
        self.op_ids.dedup();
        self.new_txs
            .sort_unstable_by_key(|tx| tx.transaction.metadata.sequence_number);
        self.new_txs
            .dedup_by_key(|tx| tx.transaction.metadata.sequence_number);
    }
}

/// Trie value: a bare "touched" marker, or a detailed record when
/// detailed logging is on.
pub struct LogEntry(pub Either<(), DetailedRecord>);

impl LogEntry {
    fn marker() -> Self {
        LogEntry(Either::Left(()))
    }

    fn detailed(record: DetailedRecord) -> Self {
        LogEntry(Either::Right(record))
    }

    /// The transactions recorded against this account, if detailed.
    pub fn new_txs(&self) -> &[SignedTransaction] {
        match &self.0 {
            Either::Left(()) => &[],
            Either::Right(rec) => &rec.new_txs,
        }
    }
}

impl TrieValue for LogEntry {
    fn merge_from(&mut self, other: Self) {
        match (&mut self.0, other.0) {
            (Either::Left(()), Either::Left(())) => {}
            (Either::Left(()), Either::Right(rec)) => {
                self.0 = Either::Right(rec);
            }
            (Either::Right(_), Either::Left(())) => {}
            (Either::Right(mine), Either::Right(theirs)) => {
                mine.new_txs.extend(theirs.new_txs);
                mine.op_ids.extend(theirs.op_ids);
                mine.normalize();
            }
        }
    }

    fn append_hash_data(&self, out: &mut Vec<u8>) {
        if let Either::Right(rec) = &self.0 {
            for id in &rec.op_ids {
                out.extend_from_slice(&id.to_be_bytes());
            }
            for tx in &rec.new_txs {
                out.extend_from_slice(&crate::crypto::hash_xdr(tx));
            }
        }
    }
}

/// The canonical per-round log.
pub struct ModificationLog {
    trie: Mutex<Trie<LogEntry, 8>>,
    cache: TrieCache<LogEntry, 8>,
    detailed: bool,
}

impl ModificationLog {
    /// An empty log. With `detailed` off, entries are bare markers.
    pub fn new(detailed: bool) -> Self {
        ModificationLog {
            trie: Mutex::new(Trie::new()),
            cache: TrieCache::new(),
            detailed,
        }
    }

    /// Check out a thread-local serial log.
    pub fn serial(&self) -> SerialModificationLog<'_> {
        SerialModificationLog {
            local: self.cache.take(),
            parent: self,
        }
    }

    /// Splice every returned serial log into the canonical trie.
    pub fn merge_in_log_batch(&self) {
        let mut trie = self.trie.lock().unwrap();
        self.cache.merge_into(&mut trie);
    }

    /// Dirty account ids in ascending order.
    pub fn dirty_accounts(&self) -> Vec<AccountId> {
        let trie = self.trie.lock().unwrap();
        let mut out = Vec::with_capacity(trie.len() as usize);
        trie.for_each(|key, _| out.push(u64::from_be_bytes(*key)));
        out
    }

    /// Apply `f` to every dirty account with subtree-level parallelism.
    pub fn parallel_iterate<F>(&self, f: F)
    where
        F: Fn(AccountId, &LogEntry) + Send + Sync,
    {
        let trie = self.trie.lock().unwrap();
        trie.par_for_each(|key, entry| f(u64::from_be_bytes(*key), entry));
    }

    /// Number of dirty accounts.
    pub fn size(&self) -> u64 {
        self.trie.lock().unwrap().len()
    }

    /// Root hash over the normalized log.
    pub fn hash(&self) -> Hash {
        self.trie.lock().unwrap().hash()
    }

    /// The canonical block body: every accepted transaction, ordered by
    /// (source account, sequence number).
    pub fn accumulate_tx_list(&self) -> Vec<SignedTransaction> {
        let trie = self.trie.lock().unwrap();
        let mut out = Vec::new();
        trie.for_each(|_, entry| {
            out.extend(entry.new_txs().iter().cloned());
        });
        out
    }

    /// Reset for the next round.
    pub fn clear(&self) {
        self.trie.lock().unwrap().clear();
        // Drain any stray serial logs left in the cache.
        let mut scratch = Trie::new();
        self.cache.merge_into(&mut scratch);
    }
}

/// A worker's private view of the modification log.
///
/// Inserts go to a local trie without any locking; the local trie
/// returns to the cache on drop, to be spliced in by
/// [`ModificationLog::merge_in_log_batch`].
pub struct SerialModificationLog<'a> {
    local: Trie<LogEntry, 8>,
    parent: &'a ModificationLog,
}

impl SerialModificationLog<'_> {
    fn entry_for(&self, op_id: u64) -> LogEntry {
        if self.parent.detailed {
            LogEntry::detailed(DetailedRecord {
                new_txs: Vec::new(),
                op_ids: vec![op_id],
            })
        } else {
            LogEntry::marker()
        }
    }

    /// Record that a transaction's source modified itself.
    pub fn log_self_modification(&mut self, account: AccountId, op_id: u64) {
        let entry = self.entry_for(op_id);
        self.local.insert(&account.to_be_bytes(), entry);
    }

    /// Record that `account` was modified by someone else's operation.
    pub fn log_other_modification(&mut self, account: AccountId, op_id: u64) {
        let entry = self.entry_for(op_id);
        self.local.insert(&account.to_be_bytes(), entry);
    }

    /// Record an accepted transaction against its source account.
    pub fn log_new_self_transaction(&mut self, tx: &SignedTransaction) {
        let account = tx.transaction.metadata.source_account;
        let entry = if self.parent.detailed {
            LogEntry::detailed(DetailedRecord {
                new_txs: vec![tx.clone()],
                op_ids: vec![tx.transaction.metadata.sequence_number],
            })
        } else {
            // The body is rebuilt from the log, so accepted transactions
            // are recorded even in marker mode.
            LogEntry::detailed(DetailedRecord {
                new_txs: vec![tx.clone()],
                op_ids: Vec::new(),
            })
        };
        self.local.insert(&account.to_be_bytes(), entry);
    }
}

impl Drop for SerialModificationLog<'_> {
    fn drop(&mut self) {
        let local = std::mem::take(&mut self.local);
        self.parent.cache.give_back(local);
    }
}
