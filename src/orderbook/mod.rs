//! Orderbooks: authenticated offer tries per directed asset pair, with
//! batch clearing at market-clearing prices.

pub mod book;
pub mod manager;
pub mod offer;

pub use book::{ClearingCredit, Orderbook, OrderbookThunk, SupplyPoint, SupplySnapshot};
pub use manager::{pair_index, ClearingSummary, OrderbookManager, OrderbookManagerView};
pub use offer::{offer_key, Offer, OfferKey, OFFER_KEY_LEN};
