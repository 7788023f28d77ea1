//! Optional per-transfer diagnostic records.
//!
//! Behaviorally invisible: nothing reads these back. When enabled, every
//! balance movement appends a record; at block seal the round's records
//! are drained to a JSON-lines file for offline conservation audits.

use crate::wire::{AccountId, AssetId, Round};
use crossbeam::queue::SegQueue;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

/// One balance movement.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    /// Account whose balance moved.
    pub account: AccountId,
    /// Asset that moved.
    pub asset: AssetId,
    /// Signed delta applied to the available balance.
    pub delta: i64,
    /// Why (op kind plus context).
    pub reason: &'static str,
}

/// Lock-free accumulator of transfer records.
#[derive(Default)]
pub struct TransferLog {
    records: SegQueue<TransferRecord>,
    out_dir: Option<PathBuf>,
}

impl TransferLog {
    /// A log that drains to files under `out_dir` (or discards when
    /// `None`).
    pub fn new(out_dir: Option<PathBuf>) -> Self {
        TransferLog {
            records: SegQueue::new(),
            out_dir,
        }
    }

    /// Record one movement.
    pub fn log(&self, account: AccountId, asset: AssetId, delta: i64, reason: &'static str) {
        self.records.push(TransferRecord {
            account,
            asset,
            delta,
            reason,
        });
    }

    /// Drain this round's records to `transfers_<round>.jsonl`. I/O
    /// failures are logged and swallowed; diagnostics must never fail a
    /// block.
    pub fn flush_round(&self, round: Round) {
        let mut drained = Vec::new();
        while let Some(r) = self.records.pop() {
            drained.push(r);
        }
        let Some(dir) = &self.out_dir else {
            return;
        };
        let path = dir.join(format!("transfers_{round}.jsonl"));
        let result = (|| -> std::io::Result<()> {
            let mut file = std::fs::File::create(&path)?;
            for record in &drained {
                serde_json::to_writer(&mut file, record)?;
                file.write_all(b"\n")?;
            }
            Ok(())
        })();
        if let Err(e) = result {
            warn!("failed to flush transfer log for round {round}: {e}");
        }
    }
}
