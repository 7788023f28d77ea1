//! The parallel batch driver: spreads a mempool (or a block body) across
//! worker threads, each running a serial evaluator over a thread-local
//! view.

use super::serial::{SerialTxProcessor, SerialTxValidator};
use super::stats::BlockStateUpdateStats;
use crate::accounts::AccountDatabase;
use crate::mempool::Mempool;
use crate::modlog::{LogMergeWorker, ModificationLog};
use crate::orderbook::OrderbookManager;
use crate::wire::SignedTransaction;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tracing::debug;

/// Work-unit size when replaying a block body.
const VALIDATION_CHUNK: usize = 512;

/// Claim up to `want` slots of the shared block-space budget.
fn reserve_space(remaining: &AtomicI64, want: usize) -> usize {
    let want = want as i64;
    let prev = remaining.fetch_sub(want, Ordering::Relaxed);
    let granted = prev.clamp(0, want);
    let refund = want - granted;
    if refund > 0 {
        remaining.fetch_add(refund, Ordering::Relaxed);
    }
    granted as usize
}

/// Drain the mempool into the current block, in parallel over chunks.
///
/// Each worker task processes one mempool chunk through its own
/// [`SerialTxProcessor`] and thread-local modification log. A shared
/// atomic budget enforces the block-size target: a chunk pre-reserves up
/// to its length and is truncated if the reservation falls short.
/// Transactions whose status is not transient are flagged for removal
/// from the pool.
#[allow(clippy::too_many_arguments)]
pub fn produce_tx_block(
    mempool: &Mempool,
    db: &AccountDatabase,
    manager: &OrderbookManager,
    log: &ModificationLog,
    merge_worker: Option<&LogMergeWorker>,
    check_sigs: bool,
    block_space: u32,
) -> BlockStateUpdateStats {
    let _processing = db.processing_guard();
    mempool.push_buffer_to_mempool();
    let remaining = AtomicI64::new(block_space as i64);

    let stats = {
        let mut chunks = mempool.lock_chunks();
        chunks
            .par_iter_mut()
            .map(|chunk| {
                let mut stats = BlockStateUpdateStats::default();
                let granted = reserve_space(&remaining, chunk.len());
                if granted == 0 {
                    return stats;
                }
                let mut processor = SerialTxProcessor::new(db, manager, check_sigs);
                let mut serial_log = log.serial();
                for idx in 0..granted {
                    let tx = chunk.txs[idx].clone();
                    let status =
                        processor.process_transaction(&tx, &mut stats, &mut serial_log);
                    if !status.is_success() {
                        stats.rejected_tx_count += 1;
                    }
                    if !status.retain_in_mempool() {
                        chunk.flag_for_removal(idx);
                    }
                }
                processor.finish();
                drop(serial_log);
                if let Some(worker) = merge_worker {
                    worker.poke();
                }
                stats
            })
            .reduce(BlockStateUpdateStats::default, |mut a, b| {
                a.merge_from(&b);
                a
            })
    };

    // Per-pair merge of every worker's staged offers, then make sure the
    // canonical modification log is complete.
    manager.finish_merges();
    if let Some(worker) = merge_worker {
        worker.wait_idle();
    }
    log.merge_in_log_batch();

    debug!(
        "batch production: {} accepted, {} rejected",
        stats.accepted_tx_count, stats.rejected_tx_count
    );
    stats
}

/// Replay a block body in parallel. Returns false (and stops early) if
/// any transaction fails to validate.
pub fn replay_tx_block(
    db: &AccountDatabase,
    manager: &OrderbookManager,
    log: &ModificationLog,
    txs: &[SignedTransaction],
    check_sigs: bool,
) -> (bool, BlockStateUpdateStats) {
    let _processing = db.processing_guard();
    let failed = AtomicBool::new(false);

    let stats = txs
        .par_chunks(VALIDATION_CHUNK)
        .map(|chunk| {
            let mut stats = BlockStateUpdateStats::default();
            if failed.load(Ordering::Relaxed) {
                return stats;
            }
            let mut validator = SerialTxValidator::new(db, manager, check_sigs);
            let mut serial_log = log.serial();
            for tx in chunk {
                if !validator.validate_transaction(tx, &mut stats, &mut serial_log) {
                    failed.store(true, Ordering::Relaxed);
                    break;
                }
            }
            validator.finish();
            stats
        })
        .reduce(BlockStateUpdateStats::default, |mut a, b| {
            a.merge_from(&b);
            a
        });

    manager.finish_merges();
    log.merge_in_log_batch();
    (!failed.load(Ordering::Relaxed), stats)
}
