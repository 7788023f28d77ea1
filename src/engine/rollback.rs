//! Scoped rollback for tentative block application.

use crate::accounts::AccountDatabase;
use crate::modlog::ModificationLog;
use crate::orderbook::OrderbookManager;
use crate::wire::Round;
use tracing::debug;

/// Guard around a tentatively applied block.
///
/// Commit must be claimed explicitly with
/// [`BlockApplyGuard::finalize_commit`]; leaving the scope without it
/// (any failed validation check) rolls every side effect back: account
/// values, staged account creations, commitment-trie rewrites, and
/// orderbook mutations.
pub struct BlockApplyGuard<'a> {
    db: &'a AccountDatabase,
    manager: &'a OrderbookManager,
    log: &'a ModificationLog,
    prev_round: Round,
    committed: bool,
}

impl<'a> BlockApplyGuard<'a> {
    /// Arm a guard before applying a block on top of `prev_round`.
    pub fn new(
        db: &'a AccountDatabase,
        manager: &'a OrderbookManager,
        log: &'a ModificationLog,
        prev_round: Round,
    ) -> Self {
        BlockApplyGuard {
            db,
            manager,
            log,
            prev_round,
            committed: false,
        }
    }

    /// The block checked out; suppress the rollback.
    pub fn finalize_commit(mut self) {
        self.committed = true;
    }
}

impl Drop for BlockApplyGuard<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        debug!("rolling back tentative block on top of round {}", self.prev_round);
        let dirty = self.log.dirty_accounts();
        self.db.rollback_values();
        self.db.rollback_new_accounts(self.prev_round);
        self.db.rollback_produce_state_commitment(&dirty);
        self.manager.rollback_round();
        self.log.clear();
    }
}
