//! Background mempool hygiene: stale-sequence filtering and compaction.

use super::Mempool;
use crate::accounts::AccountDatabase;
use crate::utils::AsyncWorker;
use crate::wire::SignedTransaction;
use std::sync::Arc;
use tracing::debug;

/// Flags transactions that can never apply again: their sequence number
/// is already at or below the source account's committed floor. Unknown
/// sources are left alone (the account may be created in a later block).
pub struct MempoolTransactionFilter {
    db: Arc<AccountDatabase>,
}

impl MempoolTransactionFilter {
    /// A filter over the shared account database.
    pub fn new(db: Arc<AccountDatabase>) -> Self {
        MempoolTransactionFilter { db }
    }

    /// Whether this transaction is permanently stale.
    pub fn should_remove(&self, tx: &SignedTransaction) -> bool {
        match self.db.lookup_user(tx.transaction.metadata.source_account) {
            Some(account) => {
                tx.transaction.metadata.sequence_number <= account.last_committed_seq()
            }
            None => false,
        }
    }
}

/// Background worker applying the stale filter across all chunks.
pub struct MempoolFilterWorker {
    worker: AsyncWorker<()>,
}

impl MempoolFilterWorker {
    /// Spawn the filter thread.
    pub fn new(pool: Arc<Mempool>, filter: MempoolTransactionFilter) -> Self {
        let worker = AsyncWorker::spawn("mempool-filter", move |()| {
            let flagged: u64 = {
                let mut chunks = pool.lock_chunks();
                chunks.iter_mut().map(|c| c.filter(&filter)).sum()
            };
            if flagged > 0 {
                debug!("mempool filter flagged {flagged} stale txs");
                pool.remove_confirmed_txs();
            }
        });
        MempoolFilterWorker { worker }
    }

    /// Request a filter pass.
    pub fn poke(&self) {
        self.worker.submit(());
    }

    /// Wait for in-flight passes to finish.
    pub fn wait_idle(&self) {
        self.worker.wait_idle();
    }
}

/// Background worker compacting the pool after block production.
pub struct MempoolCleanerWorker {
    worker: AsyncWorker<()>,
}

impl MempoolCleanerWorker {
    /// Spawn the cleaner thread.
    pub fn new(pool: Arc<Mempool>) -> Self {
        let worker = AsyncWorker::spawn("mempool-cleaner", move |()| {
            pool.remove_confirmed_txs();
            pool.join_small_chunks();
        });
        MempoolCleanerWorker { worker }
    }

    /// Request a compaction pass.
    pub fn poke(&self) {
        self.worker.submit(());
    }

    /// Wait for in-flight passes to finish.
    pub fn wait_idle(&self) {
        self.worker.wait_idle();
    }
}
