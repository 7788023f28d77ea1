//! Sell offers and their trie keys.

use crate::trie::TrieValue;
use crate::wire::{
    AccountId, OfferCategory, Price, WireError, Xdr, XdrCursor,
};
use serde::{Deserialize, Serialize};

/// Byte length of an offer's trie key.
pub const OFFER_KEY_LEN: usize = 24;

/// `min_price || owner || offer_id`, all big-endian.
///
/// Lexicographic key order is therefore primarily min-price ascending,
/// with `(owner, offer_id)` as the total-order tie break.
pub type OfferKey = [u8; OFFER_KEY_LEN];

/// Build the trie key for an offer's coordinates.
pub fn offer_key(min_price: Price, owner: AccountId, offer_id: u64) -> OfferKey {
    let mut key = [0u8; OFFER_KEY_LEN];
    key[..8].copy_from_slice(&min_price.raw().to_be_bytes());
    key[8..16].copy_from_slice(&owner.to_be_bytes());
    key[16..].copy_from_slice(&offer_id.to_be_bytes());
    key
}

/// A resting sell offer: a claim by `owner` on `amount` units of the sell
/// asset, exchangeable at an effective price of at least `min_price`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Directed pair the offer rests on.
    pub category: OfferCategory,
    /// Offer owner (receives the buy asset at clearing).
    pub owner: AccountId,
    /// `tx seqno + op index` of the creating operation.
    pub offer_id: u64,
    /// Remaining escrowed units; drops under partial clearing.
    pub amount: i64,
    /// Limit price.
    pub min_price: Price,
}

impl Offer {
    /// The offer's trie key.
    pub fn key(&self) -> OfferKey {
        offer_key(self.min_price, self.owner, self.offer_id)
    }
}

impl TrieValue for Offer {
    fn merge_from(&mut self, other: Self) {
        // Offer keys embed (owner, offer_id), and sequence-number
        // reservation makes those unique within a block; a collision here
        // means the same op ran twice.
        debug_assert_eq!(self.key(), other.key());
        *self = other;
    }

    fn append_hash_data(&self, out: &mut Vec<u8>) {
        self.write_xdr(out);
    }
}

impl Xdr for Offer {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        self.category.write_xdr(out);
        self.owner.write_xdr(out);
        self.offer_id.write_xdr(out);
        self.amount.write_xdr(out);
        self.min_price.write_xdr(out);
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        Ok(Offer {
            category: OfferCategory::read_xdr(cur)?,
            owner: cur.read_u64()?,
            offer_id: cur.read_u64()?,
            amount: cur.read_i64()?,
            min_price: Price::read_xdr(cur)?,
        })
    }
}
