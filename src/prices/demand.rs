//! Aggregate supply/demand queries over a snapshot of all books.

use crate::orderbook::{OrderbookManager, SupplySnapshot};
use crate::wire::{OfferCategory, Price};

/// Immutable per-round view of every book's supply curve.
///
/// Built once after new-offer merging; the price search queries it many
/// times without touching the books (which stay read-only during the
/// search, per the round's phase ordering).
pub struct MarketSnapshot {
    num_assets: usize,
    categories: Vec<OfferCategory>,
    books: Vec<SupplySnapshot>,
}

impl MarketSnapshot {
    /// Snapshot every canonical book.
    pub fn from_manager(manager: &OrderbookManager) -> Self {
        let books = manager.supply_snapshots();
        let categories = (0..manager.num_pairs())
            .map(|idx| manager.book(idx).category())
            .collect();
        MarketSnapshot {
            num_assets: manager.num_assets(),
            categories,
            books,
        }
    }

    /// Number of assets priced.
    pub fn num_assets(&self) -> usize {
        self.num_assets
    }

    /// Number of books.
    pub fn num_books(&self) -> usize {
        self.books.len()
    }

    /// Category of the book at `idx`.
    pub fn category(&self, idx: usize) -> OfferCategory {
        self.categories[idx]
    }

    /// Eligible sell amount of each book at `prices`.
    pub fn eligible_amounts(&self, prices: &[Price]) -> Vec<u128> {
        self.books
            .iter()
            .zip(self.categories.iter())
            .map(|(snap, cat)| {
                let (amount, _) = snap.eligible_at(
                    prices[cat.sell_asset as usize],
                    prices[cat.buy_asset as usize],
                );
                amount
            })
            .collect()
    }

    /// Per-asset excess supply in value units at `prices`.
    ///
    /// A book selling `a` for `b` whose prefix of `E` units is eligible
    /// contributes `E * p_a` of supply on `a` and the same value of
    /// demand on `b` (its sellers want to be paid in `b`). A positive
    /// entry means the asset is oversupplied at these prices.
    pub fn excess_value(&self, prices: &[Price]) -> Vec<i128> {
        let mut excess = vec![0i128; self.num_assets];
        for (snap, cat) in self.books.iter().zip(self.categories.iter()) {
            let sell = cat.sell_asset as usize;
            let buy = cat.buy_asset as usize;
            let (amount, _) = snap.eligible_at(prices[sell], prices[buy]);
            let value = (amount * prices[sell].raw() as u128) as i128;
            excess[sell] += value;
            excess[buy] -= value;
        }
        excess
    }

    /// Whether any book holds offers at all.
    pub fn is_empty(&self) -> bool {
        self.books.iter().all(|b| b.total_amount() == 0)
    }
}
