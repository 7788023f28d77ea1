//! Optional diagnostic log of computed state hashes.
//!
//! Behaviorally invisible: nothing reads these back. When enabled, the
//! root hash of every authenticated structure is recorded as a block
//! seals and drained to a per-round JSON-lines file, which makes
//! divergence between two replicas bisectable offline.

use crate::wire::{Hash, Round};
use crossbeam::queue::SegQueue;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

#[derive(Serialize)]
struct HashRecord<'a> {
    label: &'a str,
    hash: String,
}

/// Lock-free accumulator of `(label, hash)` pairs.
pub struct HashLog {
    records: SegQueue<(String, Hash)>,
    out_dir: Option<PathBuf>,
}

impl HashLog {
    /// A log draining to files under `out_dir` (or discarding).
    pub fn new(out_dir: Option<PathBuf>) -> Self {
        HashLog {
            records: SegQueue::new(),
            out_dir,
        }
    }

    /// Record one structure's hash.
    pub fn log(&self, label: impl Into<String>, hash: Hash) {
        self.records.push((label.into(), hash));
    }

    /// Drain this round's records to `hashes_<round>.jsonl`. I/O errors
    /// are logged and swallowed.
    pub fn flush_round(&self, round: Round) {
        let mut drained = Vec::new();
        while let Some(r) = self.records.pop() {
            drained.push(r);
        }
        let Some(dir) = &self.out_dir else {
            return;
        };
        let path = dir.join(format!("hashes_{round}.jsonl"));
        let result = (|| -> std::io::Result<()> {
            let mut file = std::fs::File::create(&path)?;
            for (label, hash) in &drained {
                let hex: String = hash.iter().map(|b| format!("{b:02x}")).collect();
                serde_json::to_writer(
                    &mut file,
                    &HashRecord {
                        label: label.as_str(),
                        hash: hex,
                    },
                )?;
                file.write_all(b"\n")?;
            }
            Ok(())
        })();
        if let Err(e) = result {
            warn!("failed to flush hash log for round {round}: {e}");
        }
    }
}
