//! Chunked, lock-light pool of pending transactions.
//!
//! The pool is a vector of fixed-target-size chunks plus an intake
//! buffer; adds touch only the buffer lock, block production iterates
//! chunks under the pool lock, and background workers compact and filter
//! without stalling either.

mod filter;

pub use filter::{MempoolCleanerWorker, MempoolFilterWorker, MempoolTransactionFilter};

use crate::wire::SignedTransaction;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// A chunk of pending transactions with its removal bitmap. Chunks carry
/// no synchronization of their own; the pool's locks cover them.
pub struct MempoolChunk {
    /// Pending transactions.
    pub txs: Vec<SignedTransaction>,
    /// Marked true once a transaction is confirmed or permanently dead.
    remove: Vec<bool>,
}

impl MempoolChunk {
    /// Wrap a batch of transactions.
    pub fn new(txs: Vec<SignedTransaction>) -> Self {
        let remove = vec![false; txs.len()];
        MempoolChunk { txs, remove }
    }

    /// Number of transactions (including ones flagged for removal).
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// Whether the chunk is empty.
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Replace the removal bitmap (one flag per transaction).
    pub fn set_confirmed_txs(&mut self, bitmap: Vec<bool>) {
        assert_eq!(
            bitmap.len(),
            self.txs.len(),
            "bitmap length must match chunk"
        );
        self.remove = bitmap;
    }

    /// Flag one transaction.
    pub fn flag_for_removal(&mut self, idx: usize) {
        self.remove[idx] = true;
    }

    /// Drop flagged transactions, returning how many went away.
    pub fn remove_confirmed_txs(&mut self) -> u64 {
        let before = self.txs.len();
        let mut keep = self.remove.iter();
        self.txs.retain(|_| !*keep.next().unwrap());
        self.remove.clear();
        self.remove.resize(self.txs.len(), false);
        (before - self.txs.len()) as u64
    }

    /// Apply a predicate-based filter, flagging matches for removal.
    /// Returns the number newly flagged.
    pub fn filter(&mut self, filter: &MempoolTransactionFilter) -> u64 {
        let mut flagged = 0;
        for (idx, tx) in self.txs.iter().enumerate() {
            if !self.remove[idx] && filter.should_remove(tx) {
                self.remove[idx] = true;
                flagged += 1;
            }
        }
        flagged
    }

    /// Append another chunk's contents.
    pub fn join(&mut self, other: MempoolChunk) {
        self.txs.extend(other.txs);
        self.remove.extend(other.remove);
    }
}

/// The pending-transaction pool.
pub struct Mempool {
    chunks: Mutex<Vec<MempoolChunk>>,
    buffer: Mutex<VecDeque<MempoolChunk>>,
    mempool_size: AtomicU64,
    buffer_size: AtomicU64,
    /// Chunks are kept near this many transactions.
    pub target_chunk_size: usize,
    /// Adds beyond this total are dropped.
    pub max_mempool_size: usize,
}

impl Mempool {
    /// An empty pool.
    pub fn new(target_chunk_size: usize, max_mempool_size: usize) -> Self {
        Mempool {
            chunks: Mutex::new(Vec::new()),
            buffer: Mutex::new(VecDeque::new()),
            mempool_size: AtomicU64::new(0),
            buffer_size: AtomicU64::new(0),
            target_chunk_size,
            max_mempool_size,
        }
    }

    /// Transactions in the main pool.
    pub fn size(&self) -> u64 {
        self.mempool_size.load(Ordering::Acquire)
    }

    /// Transactions in the pool plus the intake buffer.
    pub fn total_size(&self) -> u64 {
        self.buffer_size.load(Ordering::Relaxed) + self.size()
    }

    /// Chunk a batch of transactions into the intake buffer. Overflow
    /// beyond `max_mempool_size` is dropped (the overlay retries).
    pub fn chunkify_and_add_to_buffer(&self, mut txs: Vec<SignedTransaction>) {
        let room = self
            .max_mempool_size
            .saturating_sub(self.total_size() as usize);
        if txs.len() > room {
            warn!("mempool full: dropping {} incoming txs", txs.len() - room);
            txs.truncate(room);
        }
        if txs.is_empty() {
            return;
        }
        let mut buffer = self.buffer.lock().unwrap();
        let mut added = 0u64;
        while !txs.is_empty() {
            let take = txs.len().min(self.target_chunk_size);
            let rest = txs.split_off(take);
            added += txs.len() as u64;
            buffer.push_back(MempoolChunk::new(std::mem::replace(&mut txs, rest)));
        }
        self.buffer_size.fetch_add(added, Ordering::Relaxed);
    }

    /// Swap the intake buffer into the main pool.
    pub fn push_buffer_to_mempool(&self) {
        let mut drained: VecDeque<MempoolChunk> = {
            let mut buffer = self.buffer.lock().unwrap();
            std::mem::take(&mut *buffer)
        };
        if drained.is_empty() {
            return;
        }
        let moved: u64 = drained.iter().map(|c| c.len() as u64).sum();
        let mut chunks = self.chunks.lock().unwrap();
        chunks.extend(drained.drain(..));
        self.buffer_size.fetch_sub(moved, Ordering::Relaxed);
        self.mempool_size.fetch_add(moved, Ordering::Release);
    }

    /// Lock the pool for iteration (block production holds this across
    /// the parallel phase).
    pub fn lock_chunks(&self) -> MutexGuard<'_, Vec<MempoolChunk>> {
        self.chunks.lock().unwrap()
    }

    /// Drop every flagged transaction and update the size counter.
    pub fn remove_confirmed_txs(&self) {
        let mut chunks = self.chunks.lock().unwrap();
        let removed: u64 = chunks.iter_mut().map(|c| c.remove_confirmed_txs()).sum();
        chunks.retain(|c| !c.is_empty());
        if removed > 0 {
            self.mempool_size.fetch_sub(removed, Ordering::Release);
            debug!("removed {removed} confirmed txs from mempool");
        }
    }

    /// Defragment: coalesce adjacent small chunks up to the target size.
    pub fn join_small_chunks(&self) {
        let mut chunks = self.chunks.lock().unwrap();
        let mut joined: Vec<MempoolChunk> = Vec::with_capacity(chunks.len());
        for chunk in chunks.drain(..) {
            match joined.last_mut() {
                Some(last)
                    if last.len() < self.target_chunk_size / 2
                        && last.len() + chunk.len() <= self.target_chunk_size =>
                {
                    last.join(chunk);
                }
                _ => joined.push(chunk),
            }
        }
        *chunks = joined;
    }

    /// Drop roughly `num_to_drop` transactions, rounded up to whole
    /// chunks (overlay back-pressure hook).
    pub fn drop_txs(&self, num_to_drop: usize) {
        let mut chunks = self.chunks.lock().unwrap();
        let mut dropped = 0usize;
        while dropped < num_to_drop {
            let Some(chunk) = chunks.pop() else { break };
            dropped += chunk.len();
        }
        self.mempool_size
            .fetch_sub(dropped as u64, Ordering::Release);
    }
}
