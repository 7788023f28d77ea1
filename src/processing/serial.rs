//! Single-thread transaction evaluation, shared between block production
//! and block validation.
//!
//! Both paths run the same operation dispatch over a [`DbView`]
//! capability; they differ in the view (buffered vs unbuffered) and in
//! what a failure means (drop the transaction vs reject the block).

use super::stats::BlockStateUpdateStats;
use super::status::TxStatus;
use super::view::{BufferedDbView, DbView, UnbufferedDbView};
use crate::accounts::AccountDatabase;
use crate::crypto::check_tx_signature;
use crate::modlog::SerialModificationLog;
use crate::orderbook::{Offer, OrderbookManager, OrderbookManagerView};
use crate::wire::{
    fee_required, is_valid_amount, CancelSellOfferOp, CreateAccountOp, CreateSellOfferOp,
    Operation, PaymentOp, SignedTransaction, Transaction, MIN_STARTING_BALANCE, NATIVE_ASSET,
};
use tracing::trace;

fn make_offer(op: &CreateSellOfferOp, owner: u64, op_id: u64) -> Offer {
    Offer {
        category: op.category,
        owner,
        offer_id: op_id,
        amount: op.amount,
        min_price: op.min_price,
    }
}

fn process_create_account<V: DbView>(
    view: &mut V,
    source: &std::sync::Arc<crate::accounts::UserAccount>,
    op: &CreateAccountOp,
) -> TxStatus {
    if op.starting_balance < MIN_STARTING_BALANCE {
        return TxStatus::StartingBalanceTooLow;
    }
    let new_account = match view.create_new_account(op.new_account_id, op.new_public_key) {
        Ok(acct) => acct,
        Err(status) => return status,
    };
    let status = view.transfer_available(
        source,
        NATIVE_ASSET,
        -op.starting_balance,
        "create account send initial funding",
    );
    if !status.is_success() {
        return status;
    }
    if !is_valid_amount(op.starting_balance) {
        return TxStatus::InvalidAmount;
    }
    view.transfer_available(
        &new_account,
        NATIVE_ASSET,
        op.starting_balance,
        "create account recv initial funding",
    )
}

fn process_create_sell_offer<V: DbView>(
    view: &mut V,
    book_view: &mut OrderbookManagerView<'_>,
    manager: &OrderbookManager,
    source: &std::sync::Arc<crate::accounts::UserAccount>,
    op: &CreateSellOfferOp,
    op_id: u64,
) -> TxStatus {
    if !manager.validate_category(op.category) {
        return TxStatus::InvalidOfferCategory;
    }
    if !op.min_price.is_valid() {
        return TxStatus::InvalidPrice;
    }
    if !is_valid_amount(op.amount) {
        return TxStatus::InvalidAmount;
    }
    let idx = manager.look_up_idx(op.category);
    let offer = make_offer(op, source.owner(), op_id);
    book_view.add_offer(idx, offer);
    let status = view.escrow(
        source,
        op.category.sell_asset,
        op.amount,
        "create sell offer funding",
    );
    if !status.is_success() {
        trace!(
            "escrow failed, unwinding create sell offer: account {} asset {} amount {}",
            source.owner(),
            op.category.sell_asset,
            op.amount
        );
        book_view.unwind_add_offer(idx, &offer);
        return status;
    }
    TxStatus::Success
}

fn process_cancel_sell_offer<V: DbView>(
    view: &mut V,
    book_view: &mut OrderbookManagerView<'_>,
    manager: &OrderbookManager,
    source: &std::sync::Arc<crate::accounts::UserAccount>,
    op: &CancelSellOfferOp,
) -> TxStatus {
    if !manager.validate_category(op.category) {
        return TxStatus::InvalidOfferCategory;
    }
    let idx = manager.look_up_idx(op.category);
    let Some(found) = book_view.delete_offer(idx, op.min_price, source.owner(), op.offer_id)
    else {
        // Does not distinguish "never existed" from "already cleared".
        return TxStatus::CancelOfferTargetNexist;
    };
    let status = view.escrow(
        source,
        op.category.sell_asset,
        -found.amount,
        "cancel offer reclaim escrow",
    );
    if !status.is_success() {
        book_view.undelete_offer(idx, op.min_price, source.owner(), op.offer_id);
        return status;
    }
    TxStatus::Success
}

fn process_payment<V: DbView>(
    view: &mut V,
    source: &std::sync::Arc<crate::accounts::UserAccount>,
    op: &PaymentOp,
) -> TxStatus {
    if !is_valid_amount(op.amount) {
        return TxStatus::InvalidAmount;
    }
    let Some(receiver) = view.lookup_user(op.receiver) else {
        trace!("payment receiver {} not found", op.receiver);
        return TxStatus::RecipientAccountNexist;
    };
    let status = view.transfer_available(source, op.asset, -op.amount, "payment send");
    if !status.is_success() {
        return status;
    }
    view.transfer_available(&receiver, op.asset, op.amount, "payment recv")
}

#[cfg(feature = "money-printer")]
fn process_money_printer<V: DbView>(
    view: &mut V,
    source: &std::sync::Arc<crate::accounts::UserAccount>,
    op: &crate::wire::MoneyPrinterOp,
) -> TxStatus {
    if op.amount < 0 {
        return TxStatus::InvalidPrintMoneyAmount;
    }
    view.transfer_available(source, op.asset, op.amount, "money printer")
}

#[allow(clippy::too_many_arguments)]
fn process_operation<V: DbView>(
    view: &mut V,
    book_view: &mut OrderbookManagerView<'_>,
    manager: &OrderbookManager,
    source: &std::sync::Arc<crate::accounts::UserAccount>,
    op: &Operation,
    op_id: u64,
    stats: &mut BlockStateUpdateStats,
) -> TxStatus {
    match op {
        Operation::CreateAccount(op) => {
            let s = process_create_account(view, source, op);
            if s.is_success() {
                stats.new_account_count += 1;
            }
            s
        }
        Operation::CreateSellOffer(op) => {
            let s = process_create_sell_offer(view, book_view, manager, source, op, op_id);
            if s.is_success() {
                stats.new_offer_count += 1;
            }
            s
        }
        Operation::CancelSellOffer(op) => {
            let s = process_cancel_sell_offer(view, book_view, manager, source, op);
            if s.is_success() {
                stats.cancel_offer_count += 1;
            }
            s
        }
        Operation::Payment(op) => {
            let s = process_payment(view, source, op);
            if s.is_success() {
                stats.payment_count += 1;
            }
            s
        }
        #[cfg(feature = "money-printer")]
        Operation::MoneyPrinter(op) => process_money_printer(view, source, op),
        #[cfg(not(feature = "money-printer"))]
        Operation::MoneyPrinter(_) => TxStatus::InvalidOperationType,
    }
}

/// Undo the orderbook side effects of ops `0..=last_valid_op`; balance
/// effects reverse through the view's own unwind.
fn unwind_operations(
    book_view: &mut OrderbookManagerView<'_>,
    manager: &OrderbookManager,
    tx: &Transaction,
    last_valid_op: i64,
) {
    let source = tx.metadata.source_account;
    let mut op_idx = last_valid_op;
    while op_idx >= 0 {
        let op_id = tx.metadata.sequence_number + op_idx as u64;
        match &tx.operations[op_idx as usize] {
            Operation::CreateSellOffer(op) => {
                let idx = manager.look_up_idx(op.category);
                let offer = make_offer(op, source, op_id);
                book_view.unwind_add_offer(idx, &offer);
            }
            Operation::CancelSellOffer(op) => {
                let idx = manager.look_up_idx(op.category);
                book_view.undelete_offer(idx, op.min_price, source, op.offer_id);
            }
            // Account creation and balance moves reverse via the view.
            Operation::CreateAccount(_) | Operation::Payment(_) | Operation::MoneyPrinter(_) => {}
        }
        op_idx -= 1;
    }
}

fn log_modified_accounts(signed: &SignedTransaction, serial_log: &mut SerialModificationLog<'_>) {
    serial_log.log_new_self_transaction(signed);
    let tx = &signed.transaction;
    for (i, op) in tx.operations.iter().enumerate() {
        let op_id = tx.metadata.sequence_number + i as u64;
        match op {
            Operation::CreateAccount(op) => {
                serial_log.log_other_modification(op.new_account_id, op_id);
            }
            Operation::Payment(op) => {
                serial_log.log_other_modification(op.receiver, op_id);
            }
            // These only modify the source, which is already logged.
            Operation::CreateSellOffer(_)
            | Operation::CancelSellOffer(_)
            | Operation::MoneyPrinter(_) => {}
        }
    }
}

/// Per-transaction evaluator for block production (buffered view).
pub struct SerialTxProcessor<'a> {
    db: &'a AccountDatabase,
    manager: &'a OrderbookManager,
    book_view: OrderbookManagerView<'a>,
    check_sigs: bool,
}

impl<'a> SerialTxProcessor<'a> {
    /// An evaluator with its own orderbook staging view.
    pub fn new(db: &'a AccountDatabase, manager: &'a OrderbookManager, check_sigs: bool) -> Self {
        SerialTxProcessor {
            db,
            manager,
            book_view: manager.view(),
            check_sigs,
        }
    }

    /// Apply one transaction; any failure leaves no trace.
    pub fn process_transaction(
        &mut self,
        signed: &SignedTransaction,
        stats: &mut BlockStateUpdateStats,
        serial_log: &mut SerialModificationLog<'_>,
    ) -> TxStatus {
        let tx = &signed.transaction;

        if !tx.check_format() {
            return TxStatus::InvalidTxFormat;
        }
        let fee = fee_required(tx.operations.len());
        if (fee as u64) > tx.metadata.max_fee {
            return TxStatus::FeeBidTooLow;
        }
        let Some(source) = self.db.lookup_user(tx.metadata.source_account) else {
            trace!("invalid source lookup {}", tx.metadata.source_account);
            return TxStatus::SourceAccountNexist;
        };
        if self.check_sigs && !check_tx_signature(signed, source.public_key()) {
            return TxStatus::BadSignature;
        }

        let mut view = BufferedDbView::new(self.db);
        let seq_status = view.reserve_sequence_number(&source, tx.metadata.sequence_number);
        if !seq_status.is_success() {
            trace!(
                "bad seq num on account {} seqnum {}",
                tx.metadata.source_account,
                tx.metadata.sequence_number
            );
            view.unwind();
            return seq_status;
        }
        let fee_status = view.transfer_available(&source, NATIVE_ASSET, -fee, "tx fee");
        if !fee_status.is_success() {
            view.unwind();
            return fee_status;
        }

        for (i, op) in tx.operations.iter().enumerate() {
            let op_id = tx.metadata.sequence_number + i as u64;
            let status = process_operation(
                &mut view,
                &mut self.book_view,
                self.manager,
                &source,
                op,
                op_id,
                stats,
            );
            if !status.is_success() {
                trace!("op {} ({}) failed: {}", i, op.kind_name(), status);
                unwind_operations(&mut self.book_view, self.manager, tx, i as i64 - 1);
                view.unwind();
                return status;
            }
        }

        view.commit();
        log_modified_accounts(signed, serial_log);
        stats.accepted_tx_count += 1;
        TxStatus::Success
    }

    /// Return staged orderbook tries to their books.
    pub fn finish(mut self) {
        self.book_view.partial_finish_conclude();
    }
}

/// Per-transaction evaluator for block validation (unbuffered view).
pub struct SerialTxValidator<'a> {
    db: &'a AccountDatabase,
    manager: &'a OrderbookManager,
    book_view: OrderbookManagerView<'a>,
    check_sigs: bool,
}

impl<'a> SerialTxValidator<'a> {
    /// An evaluator with its own orderbook staging view.
    pub fn new(db: &'a AccountDatabase, manager: &'a OrderbookManager, check_sigs: bool) -> Self {
        SerialTxValidator {
            db,
            manager,
            book_view: manager.view(),
            check_sigs,
        }
    }

    /// Replay one transaction; false rejects the whole block.
    pub fn validate_transaction(
        &mut self,
        signed: &SignedTransaction,
        stats: &mut BlockStateUpdateStats,
        serial_log: &mut SerialModificationLog<'_>,
    ) -> bool {
        let tx = &signed.transaction;

        if !tx.check_format() {
            return false;
        }
        let Some(source) = self.db.lookup_user(tx.metadata.source_account) else {
            return false;
        };
        let fee = fee_required(tx.operations.len());
        if (fee as u64) > tx.metadata.max_fee {
            return false;
        }
        if self.check_sigs && !check_tx_signature(signed, source.public_key()) {
            return false;
        }

        let mut view = UnbufferedDbView::new(self.db);
        if !view
            .reserve_sequence_number(&source, tx.metadata.sequence_number)
            .is_success()
        {
            return false;
        }
        if !view
            .transfer_available(&source, NATIVE_ASSET, -fee, "tx fee")
            .is_success()
        {
            return false;
        }

        for (i, op) in tx.operations.iter().enumerate() {
            let op_id = tx.metadata.sequence_number + i as u64;
            let status = process_operation(
                &mut view,
                &mut self.book_view,
                self.manager,
                &source,
                op,
                op_id,
                stats,
            );
            if !status.is_success() {
                trace!("validation op {} ({}) failed: {}", i, op.kind_name(), status);
                return false;
            }
        }

        view.commit();
        log_modified_accounts(signed, serial_log);
        stats.accepted_tx_count += 1;
        true
    }

    /// Return staged orderbook tries to their books.
    pub fn finish(mut self) {
        self.book_view.partial_finish_conclude();
    }
}
