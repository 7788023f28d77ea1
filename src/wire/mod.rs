//! Wire formats: fixed-point prices, canonical XDR-style bytes, and the
//! transaction/block structures they carry.

pub mod block;
pub mod price;
pub mod tx;
pub mod xdr;

pub use block::{
    AccountCommitment, AssetCommitment, Block, BookClearing, HashedBlock, Header, StateRootHashes,
    MAX_NUM_ASSETS,
};
pub use price::{
    exchange_floor, offer_eligible, payout_after_tax, ratio_mul_floor, Price, MAX_PRICE,
    PRICE_RADIX,
};
pub use tx::{
    fee_required, is_valid_amount, AccountId, AssetId, CancelSellOfferOp, CreateAccountOp,
    CreateSellOfferOp, Hash, MoneyPrinterOp, OfferCategory, Operation, PaymentOp, PublicKeyBytes,
    Round, SignatureBytes, SignedTransaction, Transaction, TxMetadata, BASE_FEE_PER_TX,
    FEE_PER_OP, MAX_OPS_PER_TX, MAX_TX_AMOUNT, MIN_STARTING_BALANCE, NATIVE_ASSET,
};
pub use xdr::{Xdr, XdrCursor, WireError};
