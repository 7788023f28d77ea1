//! Per-block operation counters, logged at seal time.

/// Counts of applied operations in one block.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockStateUpdateStats {
    /// Applied `CREATE_SELL_OFFER` ops.
    pub new_offer_count: u64,
    /// Applied `CANCEL_SELL_OFFER` ops.
    pub cancel_offer_count: u64,
    /// Applied `PAYMENT` ops.
    pub payment_count: u64,
    /// Applied `CREATE_ACCOUNT` ops.
    pub new_account_count: u64,
    /// Transactions accepted into the block.
    pub accepted_tx_count: u64,
    /// Transactions examined but not accepted.
    pub rejected_tx_count: u64,
}

impl BlockStateUpdateStats {
    /// Fold another thread's counters into this one.
    pub fn merge_from(&mut self, other: &BlockStateUpdateStats) {
        self.new_offer_count += other.new_offer_count;
        self.cancel_offer_count += other.cancel_offer_count;
        self.payment_count += other.payment_count;
        self.new_account_count += other.new_account_count;
        self.accepted_tx_count += other.accepted_tx_count;
        self.rejected_tx_count += other.rejected_tx_count;
    }
}
