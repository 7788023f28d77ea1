//! Background merging of worker-local modification logs.

use super::ModificationLog;
use crate::utils::AsyncWorker;
use std::sync::Arc;

/// Merges returned serial logs into the canonical trie off the critical
/// path. The driver pokes this after each chunk; the seal path waits for
/// idle and then performs one final merge for any stragglers.
pub struct LogMergeWorker {
    worker: AsyncWorker<()>,
}

impl LogMergeWorker {
    /// Spawn the merge thread over a shared log.
    pub fn new(log: Arc<ModificationLog>) -> Self {
        let worker = AsyncWorker::spawn("modlog-merge", move |()| {
            log.merge_in_log_batch();
        });
        LogMergeWorker { worker }
    }

    /// Request a background merge pass.
    pub fn poke(&self) {
        self.worker.submit(());
    }

    /// Block until every requested merge has completed.
    pub fn wait_idle(&self) {
        self.worker.wait_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_merge() {
        let log = Arc::new(ModificationLog::new(false));
        let worker = LogMergeWorker::new(Arc::clone(&log));
        for n in 0..10u64 {
            let mut serial = log.serial();
            serial.log_self_modification(n, 256);
            drop(serial);
            worker.poke();
        }
        worker.wait_idle();
        log.merge_in_log_batch();
        assert_eq!(log.size(), 10);
    }
}
