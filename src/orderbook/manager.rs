//! The set of all directed orderbooks and their round orchestration.

use super::book::{ClearingCredit, Orderbook, OrderbookThunk, SupplySnapshot};
use super::offer::{Offer, OFFER_KEY_LEN};
use crate::accounts::AccountDatabase;
use crate::modlog::ModificationLog;
use crate::trie::Trie;
use crate::wire::{AssetId, BookClearing, Hash, OfferCategory, Price, Round, Xdr};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Index of the directed pair `(sell, buy)` among the `n * (n - 1)`
/// books.
pub fn pair_index(num_assets: usize, category: OfferCategory) -> usize {
    let sell = category.sell_asset as usize;
    let buy = category.buy_asset as usize;
    debug_assert!(sell != buy && sell < num_assets && buy < num_assets);
    sell * (num_assets - 1) + if buy < sell { buy } else { buy - 1 }
}

/// Totals produced by one round of clearing.
#[derive(Debug, Default)]
pub struct ClearingSummary {
    /// Per-book clearing facts, in pair-index order.
    pub details: Vec<BookClearing>,
    /// Units of each asset leaving seller escrow.
    pub sold_by_asset: Vec<u128>,
    /// Units of each asset credited to buyers.
    pub credited_by_asset: Vec<u128>,
}

impl ClearingSummary {
    /// Per-asset conservation: credits never exceed what sellers gave up.
    /// The gap is the protocol commission plus rounding dust, which is
    /// burned.
    pub fn credits_covered(&self) -> bool {
        self.credited_by_asset
            .iter()
            .zip(self.sold_by_asset.iter())
            .all(|(credited, sold)| credited <= sold)
    }
}

/// One orderbook per directed asset pair.
pub struct OrderbookManager {
    num_assets: usize,
    tax_rate: u8,
    books: Vec<Orderbook>,
}

impl OrderbookManager {
    /// Build the `n * (n - 1)` books for `num_assets` assets.
    pub fn new(num_assets: usize, tax_rate: u8) -> Self {
        let mut books = Vec::with_capacity(num_assets * (num_assets - 1));
        for sell in 0..num_assets {
            for buy in 0..num_assets {
                if sell == buy {
                    continue;
                }
                let category = OfferCategory::new(sell as AssetId, buy as AssetId);
                let idx = pair_index(num_assets, category);
                debug_assert_eq!(idx, books.len());
                books.push(Orderbook::new(category, idx));
            }
        }
        OrderbookManager {
            num_assets,
            tax_rate,
            books,
        }
    }

    /// Number of directed pairs.
    pub fn num_pairs(&self) -> usize {
        self.books.len()
    }

    /// Number of assets.
    pub fn num_assets(&self) -> usize {
        self.num_assets
    }

    /// Whether a category names two distinct known assets.
    pub fn validate_category(&self, category: OfferCategory) -> bool {
        let sell = category.sell_asset as usize;
        let buy = category.buy_asset as usize;
        sell != buy && sell < self.num_assets && buy < self.num_assets
    }

    /// Pair index of a valid category.
    pub fn look_up_idx(&self, category: OfferCategory) -> usize {
        pair_index(self.num_assets, category)
    }

    /// The book at a pair index.
    pub fn book(&self, idx: usize) -> &Orderbook {
        &self.books[idx]
    }

    /// Check out a worker-local view for staging new offers.
    pub fn view(&self) -> OrderbookManagerView<'_> {
        OrderbookManagerView {
            manager: self,
            locals: (0..self.books.len()).map(|_| None).collect(),
        }
    }

    /// Merge every worker's staged offers into the canonical books,
    /// parallelizing over pairs (not workers) to avoid contention.
    pub fn finish_merges(&self) {
        self.books.par_iter().for_each(|book| book.finish_merge());
    }

    /// Cumulative supply curves for the price search.
    pub fn supply_snapshots(&self) -> Vec<SupplySnapshot> {
        self.books
            .par_iter()
            .map(|book| book.supply_snapshot())
            .collect()
    }

    /// Clear every book at `prices` with per-book `targets`, crediting
    /// owners in the account database and logging the touched accounts.
    ///
    /// Returns `None` if any book cannot supply its target at these
    /// prices, or if per-asset credits would exceed per-asset debits;
    /// both reject the block in validation and cannot happen with
    /// solver-produced targets.
    pub fn clear_offers_apply(
        &self,
        prices: &[Price],
        targets: &[u64],
        db: &AccountDatabase,
        log: &ModificationLog,
    ) -> Option<ClearingSummary> {
        debug_assert_eq!(prices.len(), self.num_assets);
        debug_assert_eq!(targets.len(), self.books.len());

        let per_book: Vec<Option<Vec<ClearingCredit>>> = self
            .books
            .par_iter()
            .map(|book| {
                let cat = book.category();
                book.clear_offers(
                    prices[cat.sell_asset as usize],
                    prices[cat.buy_asset as usize],
                    targets[book.pair_index()],
                    self.tax_rate,
                )
            })
            .collect();

        if per_book.iter().any(|c| c.is_none()) {
            return None;
        }

        let mut summary = ClearingSummary {
            details: Vec::with_capacity(self.books.len()),
            sold_by_asset: vec![0; self.num_assets],
            credited_by_asset: vec![0; self.num_assets],
        };
        for (book, target) in self.books.iter().zip(targets.iter()) {
            summary.sold_by_asset[book.category().sell_asset as usize] += *target as u128;
        }
        for credits in per_book.iter().flatten() {
            for credit in credits {
                summary.credited_by_asset[credit.asset as usize] += credit.amount as u128;
            }
        }
        if !summary.credits_covered() {
            warn!("clearing credits exceed sold amounts; rejecting");
            return None;
        }

        // Apply credits; per-book parallelism is safe because balance
        // adjustments are atomic and log entries merge.
        per_book.par_iter().for_each(|credits| {
            let Some(credits) = credits else { return };
            let mut serial = log.serial();
            for credit in credits {
                match db.lookup_user(credit.owner) {
                    Some(account) => {
                        db.transfer_available(
                            &account,
                            credit.asset,
                            credit.amount,
                            "offer clearing payout",
                        );
                        serial.log_other_modification(credit.owner, credit.offer_id);
                    }
                    None => warn!("clearing credit for unknown account {}", credit.owner),
                }
            }
        });
        log.merge_in_log_batch();

        // Hash the post-clearing books.
        let hashes: Vec<Hash> = self.books.par_iter().map(|b| b.hash()).collect();
        for (idx, hash) in hashes.into_iter().enumerate() {
            summary.details.push(BookClearing {
                sold_amount: targets[idx],
                root_hash: hash,
            });
        }
        debug!(
            "cleared {} books, {} total units sold",
            self.books.len(),
            summary.sold_by_asset.iter().sum::<u128>()
        );
        Some(summary)
    }

    /// Clear book tries without crediting accounts. Used by trusted
    /// replay when the account store is already ahead of the orderbook
    /// store; the credits are in the accounts already.
    pub fn clear_offers_books_only(&self, prices: &[Price], targets: &[u64]) -> bool {
        let results: Vec<Option<Vec<ClearingCredit>>> = self
            .books
            .par_iter()
            .map(|book| {
                let cat = book.category();
                book.clear_offers(
                    prices[cat.sell_asset as usize],
                    prices[cat.buy_asset as usize],
                    targets[book.pair_index()],
                    self.tax_rate,
                )
            })
            .collect();
        results.iter().all(|r| r.is_some())
    }

    /// Hash over the per-book clearing entries; this is the header's
    /// orderbook state root.
    pub fn clearing_commitment(details: &[BookClearing]) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update((details.len() as u32).to_be_bytes());
        for d in details {
            hasher.update(d.to_xdr_bytes());
        }
        hasher.finalize().into()
    }

    /// Root hashes of every book (pre-clearing reads for diagnostics).
    pub fn hash_all(&self) -> Vec<Hash> {
        self.books.par_iter().map(|b| b.hash()).collect()
    }

    /// Seal the round on every book, collecting KVStore thunks.
    pub fn commit_round(&self, round: Round) -> Vec<OrderbookThunk> {
        self.books
            .iter()
            .filter_map(|b| b.commit_round(round))
            .collect()
    }

    /// Undo the current round on every book.
    pub fn rollback_round(&self) {
        self.books.par_iter().for_each(|b| b.rollback_round());
    }

    /// Drop every book's contents (rewind/reload path only).
    pub fn clear_all(&self) {
        self.books.par_iter().for_each(|b| b.clear_all());
    }

    /// Reinstall a persisted offer during reload.
    pub fn install_loaded_offer(&self, offer: Offer) {
        let idx = self.look_up_idx(offer.category);
        self.books[idx].install_loaded_offer(offer);
    }

    /// Total resting offers across all books.
    pub fn total_offers(&self) -> u64 {
        self.books.iter().map(|b| b.size()).sum()
    }
}

/// A worker's private staging view over every book.
///
/// Local tries are checked out from each book's cache on first touch and
/// handed back by [`OrderbookManagerView::partial_finish_conclude`] (or
/// on drop).
pub struct OrderbookManagerView<'a> {
    manager: &'a OrderbookManager,
    locals: Vec<Option<Trie<Offer, OFFER_KEY_LEN>>>,
}

impl OrderbookManagerView<'_> {
    /// Stage a new offer into this worker's local trie for the pair.
    pub fn add_offer(&mut self, idx: usize, offer: Offer) {
        let manager = self.manager;
        let local = self.locals[idx].get_or_insert_with(|| manager.books[idx].take_staging());
        local.insert(&offer.key(), offer);
    }

    /// Remove a just-staged offer during operation unwind. The offer is
    /// still in this worker's local trie.
    pub fn unwind_add_offer(&mut self, idx: usize, offer: &Offer) {
        if let Some(local) = &mut self.locals[idx] {
            local.perform_deletion(&offer.key());
        }
    }

    /// Cancel a resting offer in the canonical book.
    pub fn delete_offer(
        &self,
        idx: usize,
        min_price: Price,
        owner: u64,
        offer_id: u64,
    ) -> Option<Offer> {
        self.manager.books[idx].cancel_offer(min_price, owner, offer_id)
    }

    /// Undo a same-round cancellation.
    pub fn undelete_offer(&self, idx: usize, min_price: Price, owner: u64, offer_id: u64) {
        self.manager.books[idx].undelete_offer(min_price, owner, offer_id);
    }

    /// Return every checked-out local trie to its book.
    pub fn partial_finish_conclude(&mut self) {
        for (idx, slot) in self.locals.iter_mut().enumerate() {
            if let Some(local) = slot.take() {
                self.manager.books[idx].give_staging(local);
            }
        }
    }
}

impl Drop for OrderbookManagerView<'_> {
    fn drop(&mut self) {
        self.partial_finish_conclude();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ShardRouter;

    #[test]
    fn test_pair_index_is_dense_and_unique() {
        let n = 5;
        let mut seen = vec![false; n * (n - 1)];
        for sell in 0..n {
            for buy in 0..n {
                if sell == buy {
                    continue;
                }
                let idx = pair_index(n, OfferCategory::new(sell as AssetId, buy as AssetId));
                assert!(!seen[idx], "collision at {idx}");
                seen[idx] = true;
            }
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_category_validation() {
        let m = OrderbookManager::new(3, 10);
        assert!(m.validate_category(OfferCategory::new(0, 1)));
        assert!(!m.validate_category(OfferCategory::new(1, 1)));
        assert!(!m.validate_category(OfferCategory::new(0, 3)));
        assert_eq!(m.num_pairs(), 6);
    }

    #[test]
    fn test_view_staging_and_merge() {
        let m = OrderbookManager::new(2, 10);
        let idx = m.look_up_idx(OfferCategory::new(1, 0));
        {
            let mut view = m.view();
            view.add_offer(
                idx,
                Offer {
                    category: OfferCategory::new(1, 0),
                    owner: 1,
                    offer_id: 256,
                    amount: 10,
                    min_price: Price::ONE,
                },
            );
        }
        assert_eq!(m.total_offers(), 0, "staged offers not yet canonical");
        m.finish_merges();
        assert_eq!(m.total_offers(), 1);
    }

    #[test]
    fn test_unwind_add_offer_before_merge() {
        let m = OrderbookManager::new(2, 10);
        let idx = m.look_up_idx(OfferCategory::new(1, 0));
        let offer = Offer {
            category: OfferCategory::new(1, 0),
            owner: 1,
            offer_id: 256,
            amount: 10,
            min_price: Price::ONE,
        };
        let mut view = m.view();
        view.add_offer(idx, offer);
        view.unwind_add_offer(idx, &offer);
        drop(view);
        m.finish_merges();
        assert_eq!(m.total_offers(), 0);
    }

    #[test]
    fn test_clear_offers_apply_two_asset_cross() {
        let db = AccountDatabase::new(ShardRouter::new([1u8; 16], 2), 2, 64, None);
        db.install_genesis_accounts(&[(1, [1u8; 32]), (2, [2u8; 32])], |acct| {
            acct.asset(0).transfer_available(1_000);
            acct.asset(1).transfer_available(1_000);
        });
        let log = ModificationLog::new(false);
        let m = OrderbookManager::new(2, 10);

        // account 1 sells 100 of asset 0; account 2 sells 100 of asset 1
        let idx01 = m.look_up_idx(OfferCategory::new(0, 1));
        let idx10 = m.look_up_idx(OfferCategory::new(1, 0));
        {
            let mut view = m.view();
            view.add_offer(
                idx01,
                Offer {
                    category: OfferCategory::new(0, 1),
                    owner: 1,
                    offer_id: 256,
                    amount: 100,
                    min_price: Price::ONE,
                },
            );
            view.add_offer(
                idx10,
                Offer {
                    category: OfferCategory::new(1, 0),
                    owner: 2,
                    offer_id: 256,
                    amount: 100,
                    min_price: Price::ONE,
                },
            );
        }
        m.finish_merges();

        let prices = vec![Price::ONE, Price::ONE];
        let mut targets = vec![0u64; m.num_pairs()];
        targets[idx01] = 100;
        targets[idx10] = 100;
        let summary = m
            .clear_offers_apply(&prices, &targets, &db, &log)
            .expect("feasible");
        assert!(summary.credits_covered());
        assert_eq!(summary.details[idx01].sold_amount, 100);
        assert_eq!(m.total_offers(), 0);

        // each party received the other asset, minus the commission
        let paid = 100 * 1023 / 1024;
        assert_eq!(db.lookup_available_balance(1, 1), Some(1_000 + paid));
        assert_eq!(db.lookup_available_balance(2, 0), Some(1_000 + paid));
        log.merge_in_log_batch();
        assert_eq!(log.dirty_accounts(), vec![1, 2]);
    }
}
