//! One directed orderbook: an authenticated trie of sell offers plus the
//! round-delta bookkeeping that makes clearing revertable.

use super::offer::{Offer, OfferKey, OFFER_KEY_LEN};
use crate::trie::{Trie, TrieCache};
use crate::wire::price::PRICE_ONE;
use crate::wire::{
    offer_eligible, payout_after_tax, AccountId, AssetId, Hash, OfferCategory, Price, Round, Xdr,
    PRICE_RADIX,
};
use std::sync::Mutex;
use tracing::trace;

/// One point of a book's cumulative supply curve.
#[derive(Debug, Clone, Copy)]
pub struct SupplyPoint {
    /// Raw min price of the offer ending this prefix.
    pub min_price: u64,
    /// Total offered amount at or below this price.
    pub cum_amount: u128,
    /// Total `amount * min_price` (radix-scaled) at or below this price.
    pub cum_value: u128,
}

/// Immutable snapshot of a book's supply curve, built once per round
/// after new-offer staging merges and read many times by the price
/// search.
#[derive(Debug, Clone, Default)]
pub struct SupplySnapshot {
    points: Vec<SupplyPoint>,
}

impl SupplySnapshot {
    /// Eligible `(amount, value)` at the valuation pair: the largest
    /// prefix of the book whose limit prices clear.
    pub fn eligible_at(&self, sell_price: Price, buy_price: Price) -> (u128, u128) {
        let threshold = (sell_price.raw() as u128) << PRICE_RADIX;
        let idx = self
            .points
            .partition_point(|p| (p.min_price as u128) * (buy_price.raw() as u128) <= threshold);
        if idx == 0 {
            (0, 0)
        } else {
            let p = &self.points[idx - 1];
            (p.cum_amount, p.cum_value)
        }
    }

    /// Total resting amount.
    pub fn total_amount(&self) -> u128 {
        self.points.last().map_or(0, |p| p.cum_amount)
    }
}

/// A credit owed to an offer owner by this round's clearing.
#[derive(Debug, Clone, Copy)]
pub struct ClearingCredit {
    /// Offer owner receiving the buy asset.
    pub owner: AccountId,
    /// Operation id of the offer, for modification logging.
    pub offer_id: u64,
    /// Asset credited.
    pub asset: AssetId,
    /// Units credited (post-commission).
    pub amount: i64,
}

/// Deferred KVStore writes for one book's round.
#[derive(Debug)]
pub struct OrderbookThunk {
    /// Directed-pair index of the book.
    pub pair_index: usize,
    /// Round the delta belongs to.
    pub round: Round,
    /// Offers to upsert (canonical bytes).
    pub puts: Vec<(OfferKey, Vec<u8>)>,
    /// Offer keys to remove.
    pub deletes: Vec<OfferKey>,
}

#[derive(Default)]
struct RoundDelta {
    inserted: Vec<OfferKey>,
    deleted: Vec<(OfferKey, Offer)>,
    resized: Vec<(OfferKey, i64)>,
}

impl RoundDelta {
    fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.deleted.is_empty() && self.resized.is_empty()
    }
}

struct BookInner {
    trie: Trie<Offer, OFFER_KEY_LEN>,
    delta: RoundDelta,
}

/// The orderbook for one directed pair.
///
/// New offers land in worker-local staging tries and join the canonical
/// trie at [`Orderbook::finish_merge`]; cancellation and clearing mutate
/// the canonical trie under the book's lock. Every mutation is recorded
/// in a round delta so a failed validation (or a consensus rewind) can
/// restore the pre-round book exactly.
pub struct Orderbook {
    category: OfferCategory,
    pair_index: usize,
    inner: Mutex<BookInner>,
    staging: TrieCache<Offer, OFFER_KEY_LEN>,
}

impl Orderbook {
    /// An empty book.
    pub fn new(category: OfferCategory, pair_index: usize) -> Self {
        Orderbook {
            category,
            pair_index,
            inner: Mutex::new(BookInner {
                trie: Trie::new(),
                delta: RoundDelta::default(),
            }),
            staging: TrieCache::new(),
        }
    }

    /// The book's directed pair.
    pub fn category(&self) -> OfferCategory {
        self.category
    }

    /// The book's index inside the manager.
    pub fn pair_index(&self) -> usize {
        self.pair_index
    }

    /// Resting offer count.
    pub fn size(&self) -> u64 {
        self.inner.lock().unwrap().trie.len()
    }

    // --- staging ---

    /// Check out a worker-local staging trie.
    pub fn take_staging(&self) -> Trie<Offer, OFFER_KEY_LEN> {
        self.staging.take()
    }

    /// Return a staging trie after the worker finishes its share.
    pub fn give_staging(&self, trie: Trie<Offer, OFFER_KEY_LEN>) {
        self.staging.give_back(trie);
    }

    /// Merge every returned staging trie into the canonical book,
    /// recording the inserted keys for rollback.
    pub fn finish_merge(&self) {
        let locals = self.staging.drain();
        if locals.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        for local in locals {
            local.for_each(|key, _| inner.delta.inserted.push(*key));
            inner.trie.merge_in(local);
        }
    }

    // --- cancellation ---

    /// Remove a resting offer by its coordinates, returning it so the
    /// caller can refund the escrow.
    pub fn cancel_offer(
        &self,
        min_price: Price,
        owner: AccountId,
        offer_id: u64,
    ) -> Option<Offer> {
        let key = super::offer::offer_key(min_price, owner, offer_id);
        let mut inner = self.inner.lock().unwrap();
        let offer = inner.trie.perform_deletion(&key)?;
        inner.delta.deleted.push((key, offer));
        Some(offer)
    }

    /// Undo a same-round cancellation (operation unwind).
    pub fn undelete_offer(&self, min_price: Price, owner: AccountId, offer_id: u64) {
        let key = super::offer::offer_key(min_price, owner, offer_id);
        let mut inner = self.inner.lock().unwrap();
        let Some(pos) = inner.delta.deleted.iter().rposition(|(k, _)| *k == key) else {
            return;
        };
        let (_, offer) = inner.delta.deleted.remove(pos);
        inner.trie.insert(&key, offer);
    }

    // --- supply and clearing ---

    /// Build the cumulative supply curve for the price search.
    pub fn supply_snapshot(&self) -> SupplySnapshot {
        let inner = self.inner.lock().unwrap();
        let mut points: Vec<SupplyPoint> = Vec::with_capacity(inner.trie.len() as usize);
        let mut cum_amount = 0u128;
        let mut cum_value = 0u128;
        inner.trie.for_each(|_, offer| {
            cum_amount += offer.amount as u128;
            cum_value += (offer.amount as u128) * (offer.min_price.raw() as u128);
            points.push(SupplyPoint {
                min_price: offer.min_price.raw(),
                cum_amount,
                cum_value,
            });
        });
        // Collapse runs of equal min_price to their last point.
        points.dedup_by(|next, prev| {
            if prev.min_price == next.min_price {
                prev.cum_amount = next.cum_amount;
                prev.cum_value = next.cum_value;
                true
            } else {
                false
            }
        });
        SupplySnapshot { points }
    }

    /// Clear `target` units of the sell asset at the valuation pair.
    ///
    /// Walks the book in min-price order; offers below the threshold are
    /// consumed whole (and bulk-deleted), the straddling offer is
    /// partially consumed and rewritten. Returns the owed credits, or
    /// `None` when the book cannot supply `target` at these prices
    /// (validation rejects such a block).
    pub fn clear_offers(
        &self,
        sell_price: Price,
        buy_price: Price,
        target: u64,
        tax_rate: u8,
    ) -> Option<Vec<ClearingCredit>> {
        if target == 0 {
            return Some(Vec::new());
        }
        if target > i64::MAX as u64 {
            // No book can hold that much; reject before the signed math.
            return None;
        }
        let mut inner = self.inner.lock().unwrap();
        let mut remaining = target as i64;
        let mut full: Vec<OfferKey> = Vec::new();
        let mut partial: Option<(OfferKey, i64)> = None;
        let mut hit_ineligible = false;

        inner.trie.for_each_while(|key, offer| {
            if !offer_eligible(offer.min_price, sell_price, buy_price) {
                hit_ineligible = true;
                return false;
            }
            if offer.amount <= remaining {
                full.push(*key);
                remaining -= offer.amount;
                remaining > 0
            } else {
                partial = Some((*key, remaining));
                remaining = 0;
                false
            }
        });

        if remaining > 0 {
            trace!(
                "book {:?} cannot clear {} at {}/{} (ineligible tail: {})",
                self.category,
                target,
                sell_price,
                buy_price,
                hit_ineligible
            );
            return None;
        }

        let mut credits = Vec::with_capacity(full.len() + 1);
        for key in &full {
            inner.trie.mark_for_deletion(key);
        }
        let removed = inner.trie.perform_marked_deletions();
        for (key, offer) in removed {
            credits.push(ClearingCredit {
                owner: offer.owner,
                offer_id: offer.offer_id,
                asset: offer.category.buy_asset,
                amount: payout_after_tax(offer.amount, sell_price, buy_price, tax_rate),
            });
            inner.delta.deleted.push((key, offer));
        }
        if let Some((key, consumed)) = partial {
            let offer = inner
                .trie
                .get(&key)
                .copied()
                .expect("straddling offer present");
            inner.delta.resized.push((key, offer.amount));
            let slot = inner.trie.get_mut(&key).expect("straddling offer present");
            slot.amount -= consumed;
            credits.push(ClearingCredit {
                owner: offer.owner,
                offer_id: offer.offer_id,
                asset: offer.category.buy_asset,
                amount: payout_after_tax(consumed, sell_price, buy_price, tax_rate),
            });
        }
        Some(credits)
    }

    /// Immediate-execution path (continuous-auction mode): spend up to
    /// `sell_amount` units of this book's buy asset against resting
    /// offers with `min_price <= max_price`, settling at each offer's
    /// limit price. Credits are applied through `credit`. Returns
    /// `(spend_consumed, bought_amount)`.
    pub fn partial_execute<F>(&self, max_price: Price, sell_amount: u64, mut credit: F) -> (u64, u64)
    where
        F: FnMut(AccountId, AssetId, i64),
    {
        let mut inner = self.inner.lock().unwrap();
        let mut remaining_sell = sell_amount;
        let mut bought: u64 = 0;
        let mut to_mark: Vec<OfferKey> = Vec::new();
        let mut resize: Option<(OfferKey, i64)> = None;

        inner.trie.for_each_while(|key, offer| {
            if remaining_sell == 0 || offer.min_price > max_price {
                return false;
            }
            // The offer sells X at limit mp (buy units per sell unit); we
            // hold Y buy units, so it absorbs min(X * mp, Y << radix) of
            // value, rounded against the taker.
            let max_consumed = (offer.min_price.raw() as u128) * (offer.amount as u128);
            let have = (remaining_sell as u128) << PRICE_RADIX;
            let realized = max_consumed.min(have);
            let offer_consumed = (realized / offer.min_price.raw() as u128) as i64;
            let spend_consumed =
                (realized.div_ceil(PRICE_ONE as u128) as u64).min(remaining_sell);

            remaining_sell -= spend_consumed;
            bought += offer_consumed as u64;
            credit(offer.owner, offer.category.buy_asset, spend_consumed as i64);

            if offer_consumed >= offer.amount {
                to_mark.push(*key);
                true
            } else {
                resize = Some((*key, offer_consumed));
                false
            }
        });

        for key in &to_mark {
            inner.trie.mark_for_deletion(key);
        }
        let removed = inner.trie.perform_marked_deletions();
        for (key, offer) in removed {
            inner.delta.deleted.push((key, offer));
        }
        if let Some((key, consumed)) = resize {
            let old = inner.trie.get(&key).map(|o| o.amount);
            if let Some(old_amount) = old {
                inner.delta.resized.push((key, old_amount));
                inner.trie.get_mut(&key).expect("resident offer").amount -= consumed;
            }
        }
        (sell_amount - remaining_sell, bought)
    }

    // --- commitments and round lifecycle ---

    /// Root hash of the book's offer trie.
    pub fn hash(&self) -> Hash {
        self.inner.lock().unwrap().trie.hash()
    }

    /// Seal the round: turn the delta into a KVStore thunk and reset it.
    pub fn commit_round(&self, round: Round) -> Option<OrderbookThunk> {
        let mut inner = self.inner.lock().unwrap();
        if inner.delta.is_empty() {
            return None;
        }
        let delta = std::mem::take(&mut inner.delta);
        let mut puts: Vec<(OfferKey, Vec<u8>)> = Vec::new();
        let mut put_keys: Vec<OfferKey> = Vec::new();
        for key in delta
            .inserted
            .iter()
            .chain(delta.resized.iter().map(|(k, _)| k))
        {
            if let Some(offer) = inner.trie.get(key) {
                if !put_keys.contains(key) {
                    put_keys.push(*key);
                    puts.push((*key, offer.to_xdr_bytes()));
                }
            }
        }
        let deletes: Vec<OfferKey> = delta
            .deleted
            .iter()
            .map(|(k, _)| *k)
            .filter(|k| !put_keys.contains(k))
            .collect();
        Some(OrderbookThunk {
            pair_index: self.pair_index,
            round,
            puts,
            deletes,
        })
    }

    /// Undo every mutation of the current round, restoring the book to
    /// its state at the previous commit.
    pub fn rollback_round(&self) {
        let mut inner = self.inner.lock().unwrap();
        let delta = std::mem::take(&mut inner.delta);
        for (key, old_amount) in delta.resized.into_iter().rev() {
            if let Some(offer) = inner.trie.get_mut(&key) {
                offer.amount = old_amount;
            }
        }
        for (key, offer) in delta.deleted.into_iter().rev() {
            inner.trie.insert(&key, offer);
        }
        for key in delta.inserted.iter().rev() {
            inner.trie.perform_deletion(key);
        }
        // Unmerged staging tries are dropped outright.
        let _ = self.staging.drain();
    }

    /// Drop every offer and delta (rewind/reload path only).
    pub fn clear_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.trie.clear();
        inner.delta = RoundDelta::default();
        let _ = self.staging.drain();
    }

    /// Reinstall a persisted offer during reload.
    pub fn install_loaded_offer(&self, offer: Offer) {
        let mut inner = self.inner.lock().unwrap();
        let key = offer.key();
        inner.trie.insert(&key, offer);
    }

    /// Read a resting offer (tests and diagnostics).
    pub fn get_offer(&self, min_price: Price, owner: AccountId, offer_id: u64) -> Option<Offer> {
        let key = super::offer::offer_key(min_price, owner, offer_id);
        self.inner.lock().unwrap().trie.get(&key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> Orderbook {
        Orderbook::new(OfferCategory::new(1, 0), 0)
    }

    fn offer(owner: u64, offer_id: u64, amount: i64, price: Price) -> Offer {
        Offer {
            category: OfferCategory::new(1, 0),
            owner,
            offer_id,
            amount,
            min_price: price,
        }
    }

    fn stage(book: &Orderbook, offers: &[Offer]) {
        let mut local = book.take_staging();
        for o in offers {
            local.insert(&o.key(), *o);
        }
        book.give_staging(local);
        book.finish_merge();
    }

    #[test]
    fn test_stage_and_cancel_roundtrip() {
        let b = book();
        let baseline = b.hash();
        stage(&b, &[offer(1, 256, 100, Price::ONE)]);
        assert_eq!(b.size(), 1);
        assert_ne!(b.hash(), baseline);
        let cancelled = b.cancel_offer(Price::ONE, 1, 256).unwrap();
        assert_eq!(cancelled.amount, 100);
        assert_eq!(b.size(), 0);
        assert_eq!(b.hash(), baseline);
        assert!(b.cancel_offer(Price::ONE, 1, 256).is_none());
    }

    #[test]
    fn test_undelete_restores() {
        let b = book();
        stage(&b, &[offer(1, 256, 100, Price::ONE)]);
        let h = b.hash();
        b.cancel_offer(Price::ONE, 1, 256).unwrap();
        b.undelete_offer(Price::ONE, 1, 256);
        assert_eq!(b.hash(), h);
    }

    #[test]
    fn test_clear_full_and_partial() {
        let b = book();
        stage(
            &b,
            &[
                offer(1, 256, 100, Price::from_raw(PRICE_ONE / 2)),
                offer(2, 256, 100, Price::ONE),
                offer(3, 256, 100, Price::from_int(4)),
            ],
        );
        // price ratio 1.0, tax 10 bits; target 150 => offer1 whole,
        // offer2 half, offer3 untouched (ineligible at ratio 1).
        let credits = b
            .clear_offers(Price::ONE, Price::ONE, 150, 10)
            .expect("clearable");
        assert_eq!(credits.len(), 2);
        assert_eq!(credits[0].owner, 1);
        assert_eq!(credits[0].amount, 100 * 1023 / 1024);
        assert_eq!(credits[1].owner, 2);
        assert_eq!(credits[1].amount, 50 * 1023 / 1024);
        assert_eq!(b.size(), 2);
        assert_eq!(b.get_offer(Price::ONE, 2, 256).unwrap().amount, 50);
    }

    #[test]
    fn test_exact_threshold_consumes_whole_offer() {
        let b = book();
        stage(&b, &[offer(1, 256, 100, Price::ONE)]);
        let credits = b.clear_offers(Price::ONE, Price::ONE, 100, 10).unwrap();
        assert_eq!(credits.len(), 1);
        // fully consumed, not partially rewritten
        assert_eq!(b.size(), 0);
    }

    #[test]
    fn test_clear_infeasible_target() {
        let b = book();
        stage(&b, &[offer(1, 256, 100, Price::from_int(4))]);
        // ratio 1.0 < min price 4.0: nothing eligible
        assert!(b.clear_offers(Price::ONE, Price::ONE, 50, 10).is_none());
    }

    #[test]
    fn test_rollback_restores_cleared_and_inserted() {
        let b = book();
        stage(&b, &[offer(1, 256, 100, Price::ONE)]);
        b.commit_round(1);
        let committed_hash = b.hash();

        stage(&b, &[offer(2, 256, 60, Price::ONE)]);
        b.clear_offers(Price::ONE, Price::ONE, 130, 10).unwrap();
        assert_ne!(b.hash(), committed_hash);
        b.rollback_round();
        assert_eq!(b.hash(), committed_hash);
        assert_eq!(b.get_offer(Price::ONE, 1, 256).unwrap().amount, 100);
        assert!(b.get_offer(Price::ONE, 2, 256).is_none());
    }

    #[test]
    fn test_commit_round_thunk_contents() {
        let b = book();
        stage(&b, &[offer(1, 256, 100, Price::ONE), offer(2, 256, 50, Price::ONE)]);
        b.clear_offers(Price::ONE, Price::ONE, 120, 10).unwrap();
        let thunk = b.commit_round(3).unwrap();
        assert_eq!(thunk.round, 3);
        // offer 1 cleared whole (delete); offer 2 resized (put)
        assert_eq!(thunk.deletes.len(), 1);
        assert_eq!(thunk.puts.len(), 1);
        let put_offer = Offer::from_xdr_bytes(&thunk.puts[0].1).unwrap();
        assert_eq!(put_offer.owner, 2);
        assert_eq!(put_offer.amount, 30);
        // delta consumed
        assert!(b.commit_round(4).is_none());
    }

    #[test]
    fn test_supply_snapshot_prefix_sums() {
        let b = book();
        stage(
            &b,
            &[
                offer(1, 256, 100, Price::from_raw(PRICE_ONE / 2)),
                offer(2, 256, 50, Price::ONE),
                offer(3, 256, 10, Price::from_int(2)),
            ],
        );
        let snap = b.supply_snapshot();
        assert_eq!(snap.total_amount(), 160);
        // at ratio 1.0, the first two offers are eligible
        let (amount, _) = snap.eligible_at(Price::ONE, Price::ONE);
        assert_eq!(amount, 150);
        // at ratio 0.25 nothing is eligible
        let (amount, _) = snap.eligible_at(Price::from_raw(PRICE_ONE / 4), Price::ONE);
        assert_eq!(amount, 0);
    }

    #[test]
    fn test_partial_execute_crosses_cheapest_first() {
        let b = book();
        stage(
            &b,
            &[
                offer(1, 256, 100, Price::ONE),
                offer(2, 256, 100, Price::from_int(2)),
            ],
        );
        let mut credits: Vec<(u64, u16, i64)> = Vec::new();
        // spend 150 buy units at max price 2.0: 100 from offer1 at 1.0,
        // then 50 spend buys 25 units from offer2 at 2.0.
        let (spent, bought) = b.partial_execute(Price::from_int(2), 150, |owner, asset, amt| {
            credits.push((owner, asset, amt));
        });
        assert_eq!(spent, 150);
        assert_eq!(bought, 125);
        assert_eq!(credits.len(), 2);
        assert_eq!(b.get_offer(Price::from_int(2), 2, 256).unwrap().amount, 75);
        assert!(b.get_offer(Price::ONE, 1, 256).is_none());
    }
}
