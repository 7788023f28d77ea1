//! Feasibility arbitration: turn candidate prices into per-book clearing
//! targets that respect per-asset conservation.

use super::demand::MarketSnapshot;
use crate::wire::{Price, MAX_TX_AMOUNT};
use tracing::trace;

/// Outcome of one feasibility probe.
#[derive(Debug, Clone)]
pub struct FeasibleClearing {
    /// Units of the sell asset to clear, per book (pair-index order).
    pub targets: Vec<u64>,
    /// Total cleared value at the probed prices (the objective).
    pub objective: u128,
    /// True when every eligible offer clears untrimmed, i.e. the prices
    /// clear the market within the commission tolerance.
    pub exact: bool,
}

/// Deterministic feasibility/objective probe.
///
/// Starting from full eligible volumes, inbound credits of each asset are
/// proportionally trimmed until they are covered by outbound sales. The
/// trimming sequence is monotone nonincreasing on integer volumes, so it
/// terminates, and it is a pure function of `(snapshot, prices)`. That
/// purity is what lets a validator recompute the producer's clearing
/// volumes bit-for-bit.
pub struct LpSolver {
    tax_rate: u8,
}

impl LpSolver {
    /// A solver with the protocol commission.
    pub fn new(tax_rate: u8) -> Self {
        LpSolver { tax_rate }
    }

    /// Credits of the buy asset produced by selling `amount` at the pair,
    /// upper-bounding the sum of per-offer floored payouts.
    fn credit_bound(&self, amount: u128, sell_price: Price, buy_price: Price) -> u128 {
        let tax_den = 1u128 << self.tax_rate;
        amount * (sell_price.raw() as u128) * (tax_den - 1)
            / ((buy_price.raw() as u128) * tax_den)
    }

    /// Probe `prices`, returning feasible per-book targets.
    pub fn solve(&self, market: &MarketSnapshot, prices: &[Price]) -> FeasibleClearing {
        let num_assets = market.num_assets();
        let mut volumes = market.eligible_amounts(prices);
        let eligible_total: u128 = volumes.iter().sum();
        let mut exact = true;

        // Trim until inbound credits are covered per asset. Each pass
        // either leaves everything untouched (done) or strictly shrinks a
        // positive volume; the 2 * assets bound is a safety valve on top.
        for _pass in 0..(2 * num_assets.max(1)) {
            let mut inflow = vec![0u128; num_assets];
            let mut outflow = vec![0u128; num_assets];
            for idx in 0..market.num_books() {
                let cat = market.category(idx);
                let sell = cat.sell_asset as usize;
                let buy = cat.buy_asset as usize;
                outflow[sell] += volumes[idx];
                inflow[buy] +=
                    self.credit_bound(volumes[idx], prices[sell], prices[buy]);
            }

            let mut violated = false;
            for asset in 0..num_assets {
                if inflow[asset] > outflow[asset] {
                    violated = true;
                    exact = false;
                    // Scale down every book paying out this asset.
                    let num = outflow[asset];
                    let den = inflow[asset];
                    for idx in 0..market.num_books() {
                        if market.category(idx).buy_asset as usize == asset {
                            volumes[idx] = volumes[idx] * num / den;
                        }
                    }
                }
            }
            if !violated {
                break;
            }
        }

        // Last-resort: if the valve above ever exits while still violated
        // (possible only under adversarial price vectors), fall back to
        // no-trade, which is always feasible.
        if !self.is_feasible(market, prices, &volumes) {
            trace!("feasibility trim did not converge; falling back to no-trade");
            volumes.iter_mut().for_each(|v| *v = 0);
            exact = eligible_total == 0;
        }

        let mut objective = 0u128;
        let mut targets = Vec::with_capacity(volumes.len());
        for (idx, volume) in volumes.iter().enumerate() {
            let sell = market.category(idx).sell_asset as usize;
            objective += volume * prices[sell].raw() as u128;
            debug_assert!(*volume <= (MAX_TX_AMOUNT as u128) << 15);
            targets.push((*volume).min(u64::MAX as u128) as u64);
        }
        FeasibleClearing {
            targets,
            objective,
            exact: exact && eligible_total > 0,
        }
    }

    /// Check per-asset credit coverage for a volume vector.
    fn is_feasible(&self, market: &MarketSnapshot, prices: &[Price], volumes: &[u128]) -> bool {
        let num_assets = market.num_assets();
        let mut inflow = vec![0u128; num_assets];
        let mut outflow = vec![0u128; num_assets];
        for idx in 0..market.num_books() {
            let cat = market.category(idx);
            let sell = cat.sell_asset as usize;
            let buy = cat.buy_asset as usize;
            outflow[sell] += volumes[idx];
            inflow[buy] += self.credit_bound(volumes[idx], prices[sell], prices[buy]);
        }
        (0..num_assets).all(|a| inflow[a] <= outflow[a])
    }
}
