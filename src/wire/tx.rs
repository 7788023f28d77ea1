//! Transaction wire types and their structural limits.

use super::price::Price;
use super::xdr::{read_vec, write_vec, WireError, Xdr, XdrCursor};
use serde::{Deserialize, Serialize};

/// 64-bit account identifier. Never reused once created.
pub type AccountId = u64;

/// Small asset identifier; the engine supports at most 256 assets.
pub type AssetId = u16;

/// Block number. Genesis is round 0; the first produced block is round 1.
pub type Round = u64;

/// A 32-byte structural hash.
pub type Hash = [u8; 32];

/// Raw ed25519 public key bytes.
pub type PublicKeyBytes = [u8; 32];

/// Raw ed25519 detached signature bytes.
pub type SignatureBytes = [u8; 64];

/// The distinguished asset used for fees and new-account funding.
pub const NATIVE_ASSET: AssetId = 0;

/// Operations per transaction are capped so the low 8 bits of a sequence
/// number can index them.
pub const MAX_OPS_PER_TX: u32 = 256;

/// Mask of the sequence-number bits reserved for the operation index.
pub const RESERVED_SEQ_LOWBITS: u64 = 0xFF;

/// Largest operation amount. One account can then move at most
/// `MAX_TX_AMOUNT * 256 * 64 < 2^63` units in a block, so no interleaving
/// of valid transactions can overflow an `i64` balance.
pub const MAX_TX_AMOUNT: i64 = 1i64 << 48;

/// Flat fee charged per transaction, in the native asset.
pub const BASE_FEE_PER_TX: i64 = 10;

/// Additional fee charged per operation, in the native asset.
pub const FEE_PER_OP: i64 = 5;

/// Minimum native-asset funding for a newly created account.
pub const MIN_STARTING_BALANCE: i64 = 10;

/// Whether `amount` is inside the protocol's operation-amount bound.
pub fn is_valid_amount(amount: i64) -> bool {
    amount > 0 && amount <= MAX_TX_AMOUNT
}

/// Serde codec for 64-byte signatures (serde has no built-in impls past
/// 32-byte arrays). Only diagnostics use serde; canonical bytes go
/// through the XDR codec.
pub(crate) mod sig_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(sig: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(sig)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let v: Vec<u8> = Vec::deserialize(d)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 64 bytes"))
    }
}

/// Fee owed by a transaction with `op_count` operations.
pub fn fee_required(op_count: usize) -> i64 {
    BASE_FEE_PER_TX + FEE_PER_OP * op_count as i64
}

/// A directed asset pair: sell `sell_asset`, receive `buy_asset`.
///
/// All offers are sells; a "buy" is a sell on the mirrored pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferCategory {
    /// Asset escrowed and given up by the offer owner.
    pub sell_asset: AssetId,
    /// Asset the owner receives when the offer trades.
    pub buy_asset: AssetId,
}

impl OfferCategory {
    /// Construct a directed pair.
    pub fn new(sell_asset: AssetId, buy_asset: AssetId) -> Self {
        OfferCategory {
            sell_asset,
            buy_asset,
        }
    }
}

/// Fixed per-transaction fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMetadata {
    /// Account paying the fee and authorizing every operation.
    pub source_account: AccountId,
    /// Sequence number; the low 8 bits must be zero.
    pub sequence_number: u64,
    /// Highest fee the source is willing to pay.
    pub max_fee: u64,
}

/// Fund a new account from the source's native balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountOp {
    /// Identifier of the account to create. Must be globally fresh.
    pub new_account_id: AccountId,
    /// Public key controlling the new account.
    pub new_public_key: PublicKeyBytes,
    /// Native-asset funding moved from the source account.
    pub starting_balance: i64,
}

/// Place a sell offer on one directed orderbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSellOfferOp {
    /// Directed pair the offer rests on.
    pub category: OfferCategory,
    /// Units of the sell asset escrowed behind the offer.
    pub amount: i64,
    /// Lowest acceptable units of buy asset per unit of sell asset.
    pub min_price: Price,
}

/// Remove a resting offer and reclaim its escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSellOfferOp {
    /// Directed pair the offer rests on.
    pub category: OfferCategory,
    /// Limit price the offer was placed with (part of its key).
    pub min_price: Price,
    /// The offer's sequence identifier: `tx seqno + op index`.
    pub offer_id: u64,
}

/// Move `amount` of `asset` from the source to `receiver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOp {
    /// Receiving account; must already exist.
    pub receiver: AccountId,
    /// Asset transferred.
    pub asset: AssetId,
    /// Units transferred.
    pub amount: i64,
}

/// Conjure `amount` of `asset` into the source account. Test tooling only;
/// processing accepts it only with the `money-printer` feature enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyPrinterOp {
    /// Asset created.
    pub asset: AssetId,
    /// Units created.
    pub amount: i64,
}

/// One operation of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Create and fund a new account.
    CreateAccount(CreateAccountOp),
    /// Place a sell offer.
    CreateSellOffer(CreateSellOfferOp),
    /// Cancel a resting sell offer.
    CancelSellOffer(CancelSellOfferOp),
    /// Pay another account.
    Payment(PaymentOp),
    /// Conjure money (test tooling).
    MoneyPrinter(MoneyPrinterOp),
}

impl Operation {
    /// Short name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Operation::CreateAccount(_) => "CREATE_ACCOUNT",
            Operation::CreateSellOffer(_) => "CREATE_SELL_OFFER",
            Operation::CancelSellOffer(_) => "CANCEL_SELL_OFFER",
            Operation::Payment(_) => "PAYMENT",
            Operation::MoneyPrinter(_) => "MONEY_PRINTER",
        }
    }
}

/// An unsigned transaction: metadata plus up to 256 operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Source, sequence number, fee bid.
    pub metadata: TxMetadata,
    /// Operations applied in order.
    pub operations: Vec<Operation>,
}

impl Transaction {
    /// Structural format check: reserved sequence bits clear and operation
    /// count within bounds.
    pub fn check_format(&self) -> bool {
        if self.metadata.sequence_number & RESERVED_SEQ_LOWBITS != 0 {
            return false;
        }
        !self.operations.is_empty() && self.operations.len() <= MAX_OPS_PER_TX as usize
    }
}

/// A transaction plus its ed25519 signature over the canonical tx bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// The signed payload.
    pub transaction: Transaction,
    /// Detached signature under the source account's public key.
    #[serde(with = "sig_bytes")]
    pub signature: SignatureBytes,
}

// --- canonical encodings ---

impl Xdr for Price {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        self.0.write_xdr(out);
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        Ok(Price(cur.read_u64()?))
    }
}

impl Xdr for OfferCategory {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        (self.sell_asset as u32).write_xdr(out);
        (self.buy_asset as u32).write_xdr(out);
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        let sell = cur.read_u32()?;
        let buy = cur.read_u32()?;
        if sell > u16::MAX as u32 || buy > u16::MAX as u32 {
            return Err(WireError::InvalidValue("asset id out of range"));
        }
        Ok(OfferCategory {
            sell_asset: sell as AssetId,
            buy_asset: buy as AssetId,
        })
    }
}

impl Xdr for TxMetadata {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        self.source_account.write_xdr(out);
        self.sequence_number.write_xdr(out);
        self.max_fee.write_xdr(out);
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        Ok(TxMetadata {
            source_account: cur.read_u64()?,
            sequence_number: cur.read_u64()?,
            max_fee: cur.read_u64()?,
        })
    }
}

impl Xdr for Operation {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        match self {
            Operation::CreateAccount(op) => {
                0u32.write_xdr(out);
                op.new_account_id.write_xdr(out);
                op.new_public_key.write_xdr(out);
                op.starting_balance.write_xdr(out);
            }
            Operation::CreateSellOffer(op) => {
                1u32.write_xdr(out);
                op.category.write_xdr(out);
                op.amount.write_xdr(out);
                op.min_price.write_xdr(out);
            }
            Operation::CancelSellOffer(op) => {
                2u32.write_xdr(out);
                op.category.write_xdr(out);
                op.min_price.write_xdr(out);
                op.offer_id.write_xdr(out);
            }
            Operation::Payment(op) => {
                3u32.write_xdr(out);
                op.receiver.write_xdr(out);
                (op.asset as u32).write_xdr(out);
                op.amount.write_xdr(out);
            }
            Operation::MoneyPrinter(op) => {
                4u32.write_xdr(out);
                (op.asset as u32).write_xdr(out);
                op.amount.write_xdr(out);
            }
        }
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        let disc = cur.read_u32()?;
        match disc {
            0 => Ok(Operation::CreateAccount(CreateAccountOp {
                new_account_id: cur.read_u64()?,
                new_public_key: cur.read_bytes::<32>()?,
                starting_balance: cur.read_i64()?,
            })),
            1 => Ok(Operation::CreateSellOffer(CreateSellOfferOp {
                category: OfferCategory::read_xdr(cur)?,
                amount: cur.read_i64()?,
                min_price: Price::read_xdr(cur)?,
            })),
            2 => Ok(Operation::CancelSellOffer(CancelSellOfferOp {
                category: OfferCategory::read_xdr(cur)?,
                min_price: Price::read_xdr(cur)?,
                offer_id: cur.read_u64()?,
            })),
            3 => {
                let receiver = cur.read_u64()?;
                let asset = cur.read_u32()?;
                if asset > u16::MAX as u32 {
                    return Err(WireError::InvalidValue("asset id out of range"));
                }
                Ok(Operation::Payment(PaymentOp {
                    receiver,
                    asset: asset as AssetId,
                    amount: cur.read_i64()?,
                }))
            }
            4 => {
                let asset = cur.read_u32()?;
                if asset > u16::MAX as u32 {
                    return Err(WireError::InvalidValue("asset id out of range"));
                }
                Ok(Operation::MoneyPrinter(MoneyPrinterOp {
                    asset: asset as AssetId,
                    amount: cur.read_i64()?,
                }))
            }
            other => Err(WireError::InvalidDiscriminant(other)),
        }
    }
}

impl Xdr for Transaction {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        self.metadata.write_xdr(out);
        write_vec(&self.operations, out);
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        Ok(Transaction {
            metadata: TxMetadata::read_xdr(cur)?,
            operations: read_vec(cur, MAX_OPS_PER_TX)?,
        })
    }
}

impl Xdr for SignedTransaction {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        self.transaction.write_xdr(out);
        self.signature.write_xdr(out);
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        Ok(SignedTransaction {
            transaction: Transaction::read_xdr(cur)?,
            signature: cur.read_bytes::<64>()?,
        })
    }
}
