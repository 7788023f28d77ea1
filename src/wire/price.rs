//! Fixed-point prices and the 128-bit ratio arithmetic used in clearing.

use serde::{Deserialize, Serialize};

/// Number of fractional bits in a [`Price`].
pub const PRICE_RADIX: u32 = 24;

/// The fixed-point representation of 1.0.
pub const PRICE_ONE: u64 = 1u64 << PRICE_RADIX;

/// Upper bound (inclusive) on a valid price.
///
/// Bounding prices to 48 bits keeps every `amount * price_a / price_b`
/// intermediate inside 128 bits with room to spare.
pub const MAX_PRICE: u64 = 1u64 << (2 * PRICE_RADIX);

/// A fixed-point price with [`PRICE_RADIX`] fractional bits.
///
/// Prices are per-asset valuations: a directed orderbook selling asset `a`
/// for asset `b` trades at the ratio `price(a) / price(b)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(pub u64);

impl Price {
    /// The fixed-point representation of 1.0.
    pub const ONE: Price = Price(PRICE_ONE);

    /// Construct from raw fixed-point bits.
    pub fn from_raw(raw: u64) -> Self {
        Price(raw)
    }

    /// Construct from an integer number of units.
    pub fn from_int(units: u64) -> Self {
        Price(units << PRICE_RADIX)
    }

    /// Raw fixed-point bits.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// A price is valid when it is positive and within the 48-bit bound.
    pub fn is_valid(&self) -> bool {
        self.0 > 0 && self.0 <= MAX_PRICE
    }

    /// Approximate `f64` value, for diagnostics only.
    pub fn to_f64(&self) -> f64 {
        self.0 as f64 / PRICE_ONE as f64
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}", self.to_f64())
    }
}

/// `floor(amount * num / den)` with a 128-bit intermediate, saturating at
/// `i64::MAX`.
///
/// Saturation can only be reached on adversarial inputs; the balance layer
/// rejects the resulting credit via its checked arithmetic.
pub fn ratio_mul_floor(amount: i64, num: u64, den: u64) -> i64 {
    debug_assert!(den > 0);
    debug_assert!(amount >= 0);
    let wide = (amount as u128) * (num as u128) / (den as u128);
    wide.min(i64::MAX as u128) as i64
}

/// `floor(amount * sell_price / buy_price)`, the gross proceeds of selling
/// `amount` units at the ratio of the two per-asset valuations.
pub fn exchange_floor(amount: i64, sell_price: Price, buy_price: Price) -> i64 {
    ratio_mul_floor(amount, sell_price.0, buy_price.0)
}

/// Whether a sell offer with limit `min_price` is eligible to trade at the
/// valuation pair `(sell_price, buy_price)`.
///
/// Eligibility is `min_price <= sell_price / buy_price`, evaluated without
/// division as `min_price * buy_price <= sell_price << RADIX`.
pub fn offer_eligible(min_price: Price, sell_price: Price, buy_price: Price) -> bool {
    (min_price.0 as u128) * (buy_price.0 as u128) <= (sell_price.0 as u128) << PRICE_RADIX
}

/// Buy-asset proceeds for selling `amount` at the valuation pair, after
/// the protocol commission `2^-tax_rate`:
/// `floor(amount * sell * (2^t - 1) / (buy * 2^t))`.
///
/// The commission strictly dominates every floor in the block, which is
/// what lets per-asset credits stay below per-asset debits.
pub fn payout_after_tax(amount: i64, sell_price: Price, buy_price: Price, tax_rate: u8) -> i64 {
    // tax_rate is bounded by config validation; with amount <= 2^48 and
    // prices <= 2^48 the triple product stays inside u128.
    debug_assert!(amount >= 0);
    debug_assert!(tax_rate > 0 && tax_rate < 16);
    let tax_den = 1u128 << tax_rate;
    let num = (amount as u128) * (sell_price.0 as u128) * (tax_den - 1);
    let den = (buy_price.0 as u128) * tax_den;
    (num / den).min(i64::MAX as u128) as i64
}
