//! Per-transaction status codes and their mempool-retention policy.

use serde::{Deserialize, Serialize};

/// Outcome of processing one transaction.
///
/// These are data, not errors: during block production they select whether
/// the transaction leaves the mempool; during validation anything but
/// `Success` fails the whole block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxStatus {
    /// Transaction applied in full.
    Success,

    // format
    /// Reserved sequence bits set, zero ops, or more than 256 ops.
    InvalidTxFormat,
    /// Unknown operation discriminant.
    InvalidOperationType,
    /// Operation amount outside `(0, 2^48]`.
    InvalidAmount,
    /// Offer price zero or above the price bound.
    InvalidPrice,
    /// Offer category names an unknown asset or a self-pair.
    InvalidOfferCategory,

    // authorization
    /// Signature did not verify under the source account's key.
    BadSignature,
    /// `max_fee` below the required fee for this operation count.
    FeeBidTooLow,

    // lookup
    /// Source account does not exist.
    SourceAccountNexist,
    /// Payment receiver does not exist.
    RecipientAccountNexist,
    /// Cancelled offer was not found in its book.
    CancelOfferTargetNexist,

    // sequencing
    /// Sequence number at or below the account's committed sequence.
    SeqNumTooLow,
    /// Sequence number beyond the per-block reservation window.
    SeqNumTooHigh,
    /// Another transaction holds this sequence number this block.
    SeqNumTempInUse,

    // resources
    /// A balance check failed (fee, payment, escrow, or funding).
    InsufficientBalance,
    /// Account id already exists in the committed database.
    NewAccountAlreadyExists,
    /// Account id was reserved by another transaction this block.
    NewAccountTempReserved,
    /// `CREATE_ACCOUNT` funding below the minimum.
    StartingBalanceTooLow,
    /// `MONEY_PRINTER` amount negative.
    InvalidPrintMoneyAmount,
}

impl TxStatus {
    /// Whether a production-time failure keeps the transaction in the
    /// mempool for a later block.
    ///
    /// Only transient conditions are retained: a sequence number ahead of
    /// its window, or a collision with a same-block reservation that may
    /// not commit. Everything else is permanently dead or already applied.
    ///
    /// Exhaustive on purpose: adding a status without classifying it here
    /// must not compile.
    pub fn retain_in_mempool(&self) -> bool {
        match self {
            TxStatus::SeqNumTooHigh
            | TxStatus::SeqNumTempInUse
            | TxStatus::NewAccountTempReserved => true,

            TxStatus::Success
            | TxStatus::InvalidTxFormat
            | TxStatus::InvalidOperationType
            | TxStatus::InvalidAmount
            | TxStatus::InvalidPrice
            | TxStatus::InvalidOfferCategory
            | TxStatus::BadSignature
            | TxStatus::FeeBidTooLow
            | TxStatus::SourceAccountNexist
            | TxStatus::RecipientAccountNexist
            | TxStatus::CancelOfferTargetNexist
            | TxStatus::SeqNumTooLow
            | TxStatus::InsufficientBalance
            | TxStatus::NewAccountAlreadyExists
            | TxStatus::StartingBalanceTooLow
            | TxStatus::InvalidPrintMoneyAmount => false,
        }
    }

    /// Whether the transaction applied.
    pub fn is_success(&self) -> bool {
        matches!(self, TxStatus::Success)
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
