//! Database views: how a transaction's effects reach the account store.
//!
//! Block production uses the buffered view: debits apply immediately
//! (guarded by the balance CAS), credits accumulate in the view and land
//! only when the transaction commits, so a failed transaction leaves no
//! trace. Validation uses the unbuffered view: every delta hits the
//! database immediately, per-op failure is impossible, and validity is
//! re-checked globally at end of block (with whole-block rollback on
//! failure).

use super::status::TxStatus;
use crate::accounts::{AccountDatabase, UserAccount};
use crate::wire::{AccountId, AssetId, PublicKeyBytes};
use std::collections::HashMap;
use std::sync::Arc;

/// The capability a serial transaction handler needs from the account
/// store. Implementations differ in buffering and unwind discipline.
pub trait DbView {
    /// Account lookup; the buffered view also resolves accounts created
    /// earlier in the same transaction.
    fn lookup_user(&self, account: AccountId) -> Option<Arc<UserAccount>>;

    /// Adjust an available balance by `delta` (either sign).
    fn transfer_available(
        &mut self,
        account: &Arc<UserAccount>,
        asset: AssetId,
        delta: i64,
        reason: &'static str,
    ) -> TxStatus;

    /// Move `amount` into escrow (negative releases escrow).
    fn escrow(
        &mut self,
        account: &Arc<UserAccount>,
        asset: AssetId,
        amount: i64,
        reason: &'static str,
    ) -> TxStatus;

    /// Reserve a sequence number.
    fn reserve_sequence_number(&mut self, account: &Arc<UserAccount>, seq: u64) -> TxStatus;

    /// Create a new account under this view.
    fn create_new_account(
        &mut self,
        account: AccountId,
        pk: PublicKeyBytes,
    ) -> Result<Arc<UserAccount>, TxStatus>;

    /// Finalize the transaction's effects.
    fn commit(&mut self);

    /// Discard the transaction's effects.
    fn unwind(&mut self);
}

enum AppliedOp {
    Transfer {
        account: Arc<UserAccount>,
        asset: AssetId,
        delta: i64,
    },
    Escrow {
        account: Arc<UserAccount>,
        asset: AssetId,
        amount: i64,
    },
}

/// Production view: debits now, credits at commit.
pub struct BufferedDbView<'a> {
    db: &'a AccountDatabase,
    /// Credits and escrow releases awaiting commit.
    buffered: Vec<AppliedOp>,
    /// Immediately applied debits, reversed on unwind.
    undo: Vec<AppliedOp>,
    /// Accounts created this transaction, visible to its later ops.
    created: HashMap<AccountId, Arc<UserAccount>>,
    reserved_seq: Option<(Arc<UserAccount>, u64)>,
}

impl<'a> BufferedDbView<'a> {
    /// A fresh per-transaction view.
    pub fn new(db: &'a AccountDatabase) -> Self {
        BufferedDbView {
            db,
            buffered: Vec::new(),
            undo: Vec::new(),
            created: HashMap::new(),
            reserved_seq: None,
        }
    }
}

impl DbView for BufferedDbView<'_> {
    fn lookup_user(&self, account: AccountId) -> Option<Arc<UserAccount>> {
        self.db
            .lookup_user(account)
            .or_else(|| self.created.get(&account).cloned())
    }

    fn transfer_available(
        &mut self,
        account: &Arc<UserAccount>,
        asset: AssetId,
        delta: i64,
        reason: &'static str,
    ) -> TxStatus {
        if delta >= 0 {
            self.buffered.push(AppliedOp::Transfer {
                account: Arc::clone(account),
                asset,
                delta,
            });
            return TxStatus::Success;
        }
        if !self
            .db
            .conditional_transfer_available(account, asset, delta, reason)
        {
            return TxStatus::InsufficientBalance;
        }
        self.undo.push(AppliedOp::Transfer {
            account: Arc::clone(account),
            asset,
            delta,
        });
        TxStatus::Success
    }

    fn escrow(
        &mut self,
        account: &Arc<UserAccount>,
        asset: AssetId,
        amount: i64,
        reason: &'static str,
    ) -> TxStatus {
        if amount <= 0 {
            // Escrow release is a credit; buffer it.
            self.buffered.push(AppliedOp::Escrow {
                account: Arc::clone(account),
                asset,
                amount,
            });
            return TxStatus::Success;
        }
        if !self.db.conditional_escrow(account, asset, amount, reason) {
            return TxStatus::InsufficientBalance;
        }
        self.undo.push(AppliedOp::Escrow {
            account: Arc::clone(account),
            asset,
            amount,
        });
        TxStatus::Success
    }

    fn reserve_sequence_number(&mut self, account: &Arc<UserAccount>, seq: u64) -> TxStatus {
        let status = account.reserve_sequence_number(seq);
        if status.is_success() {
            self.reserved_seq = Some((Arc::clone(account), seq));
        }
        status
    }

    fn create_new_account(
        &mut self,
        account: AccountId,
        pk: PublicKeyBytes,
    ) -> Result<Arc<UserAccount>, TxStatus> {
        let status = self.db.reserve_account_creation(account);
        if !status.is_success() {
            return Err(status);
        }
        let acct = self.db.new_account_shell(account, pk);
        self.created.insert(account, Arc::clone(&acct));
        Ok(acct)
    }

    fn commit(&mut self) {
        for op in self.buffered.drain(..) {
            match op {
                AppliedOp::Transfer {
                    account,
                    asset,
                    delta,
                } => self
                    .db
                    .transfer_available(&account, asset, delta, "buffered credit"),
                AppliedOp::Escrow {
                    account,
                    asset,
                    amount,
                } => self.db.escrow(&account, asset, amount, "buffered escrow"),
            }
        }
        for (_, acct) in self.created.drain() {
            self.db.stage_created_account(acct);
        }
        self.undo.clear();
        self.reserved_seq = None;
    }

    fn unwind(&mut self) {
        self.buffered.clear();
        for op in self.undo.drain(..).rev() {
            match op {
                AppliedOp::Transfer {
                    account,
                    asset,
                    delta,
                } => self
                    .db
                    .transfer_available(&account, asset, -delta, "unwind transfer"),
                AppliedOp::Escrow {
                    account,
                    asset,
                    amount,
                } => self.db.escrow(&account, asset, -amount, "unwind escrow"),
            }
        }
        for (id, _) in self.created.drain() {
            self.db.release_account_creation(id);
        }
        if let Some((account, seq)) = self.reserved_seq.take() {
            account.release_sequence_number(seq);
        }
    }
}

/// Validation view: everything immediate, rollback is whole-block.
pub struct UnbufferedDbView<'a> {
    db: &'a AccountDatabase,
}

impl<'a> UnbufferedDbView<'a> {
    /// A view over `db`.
    pub fn new(db: &'a AccountDatabase) -> Self {
        UnbufferedDbView { db }
    }
}

impl DbView for UnbufferedDbView<'_> {
    fn lookup_user(&self, account: AccountId) -> Option<Arc<UserAccount>> {
        self.db.lookup_user(account)
    }

    fn transfer_available(
        &mut self,
        account: &Arc<UserAccount>,
        asset: AssetId,
        delta: i64,
        reason: &'static str,
    ) -> TxStatus {
        self.db.transfer_available(account, asset, delta, reason);
        TxStatus::Success
    }

    fn escrow(
        &mut self,
        account: &Arc<UserAccount>,
        asset: AssetId,
        amount: i64,
        reason: &'static str,
    ) -> TxStatus {
        self.db.escrow(account, asset, amount, reason);
        TxStatus::Success
    }

    fn reserve_sequence_number(&mut self, account: &Arc<UserAccount>, seq: u64) -> TxStatus {
        account.reserve_sequence_number(seq)
    }

    fn create_new_account(
        &mut self,
        account: AccountId,
        pk: PublicKeyBytes,
    ) -> Result<Arc<UserAccount>, TxStatus> {
        let status = self.db.reserve_account_creation(account);
        if !status.is_success() {
            return Err(status);
        }
        Ok(self.db.commit_account_creation(account, pk))
    }

    fn commit(&mut self) {}

    fn unwind(&mut self) {
        // Validation rejects the whole block on any per-tx failure;
        // partially applied state is undone by the block-level rollback.
    }
}
