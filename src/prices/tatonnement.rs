//! Tâtonnement: dampened multiplicative price adjustment, arbitrated by
//! the feasibility solver.

use super::demand::MarketSnapshot;
use super::solver::{FeasibleClearing, LpSolver};
use crate::wire::{Price, MAX_PRICE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Solver probe cadence, in search steps.
const PROBE_INTERVAL: u32 = 64;

/// Hard cap on search steps regardless of wall clock.
const MAX_STEPS: u32 = 1 << 14;

/// Tuning knobs for the price search.
#[derive(Debug, Clone, Copy)]
pub struct TatonnementConfig {
    /// Initial step shift: step size starts at `price >> smooth_mult`.
    pub smooth_mult: u8,
    /// Protocol commission exponent (shared with clearing).
    pub tax_rate: u8,
}

/// Result of a price search: the prices, the feasible per-book volumes
/// at those prices, and whether the market cleared exactly.
#[derive(Debug, Clone)]
pub struct PriceSearchResult {
    /// One valuation per asset.
    pub prices: Vec<Price>,
    /// Feasible per-book clearing targets at `prices`.
    pub clearing: FeasibleClearing,
}

/// Iterative clearing-price search.
///
/// Prices move multiplicatively against the sign of per-asset excess
/// value; an asset's step shrinks when its excess flips sign and grows
/// while the sign persists. Every [`PROBE_INTERVAL`] steps (or when the
/// excess collapses) the feasibility solver scores the candidate; the
/// best-scoring probe wins when the budget runs out.
pub struct TatonnementOracle {
    config: TatonnementConfig,
    solver: LpSolver,
}

impl TatonnementOracle {
    /// An oracle with the given tuning.
    pub fn new(config: TatonnementConfig) -> Self {
        TatonnementOracle {
            solver: LpSolver::new(config.tax_rate),
            config,
        }
    }

    /// Search from `start_prices` until an exact clearing is certified,
    /// the step budget runs out, or `stop` is raised. Always returns a
    /// usable (feasible) result; an empty market yields no-trade.
    pub fn compute_prices(
        &self,
        market: &MarketSnapshot,
        start_prices: &[Price],
        stop: &AtomicBool,
    ) -> PriceSearchResult {
        let num_assets = market.num_assets();
        debug_assert_eq!(start_prices.len(), num_assets);
        let mut prices: Vec<Price> = start_prices.to_vec();

        if market.is_empty() {
            return PriceSearchResult {
                clearing: self.solver.solve(market, &prices),
                prices,
            };
        }

        let mut best_prices = prices.clone();
        let mut best = self.solver.solve(market, &prices);
        let mut shifts: Vec<u32> = vec![self.config.smooth_mult as u32; num_assets];
        let mut prev_signs: Vec<i8> = vec![0; num_assets];
        let mut steps = 0u32;

        while steps < MAX_STEPS && !stop.load(Ordering::Relaxed) {
            steps += 1;
            let excess = market.excess_value(&prices);

            let mut all_balanced = true;
            for asset in 0..num_assets {
                let sign = match excess[asset] {
                    e if e > 0 => 1i8,
                    e if e < 0 => -1i8,
                    _ => 0,
                };
                if sign != 0 {
                    all_balanced = false;
                }
                // Dampen on oscillation, accelerate on persistence.
                if sign != 0 && prev_signs[asset] != 0 {
                    if sign != prev_signs[asset] {
                        shifts[asset] = (shifts[asset] + 1).min(40);
                    } else {
                        shifts[asset] = shifts[asset].saturating_sub(1).max(2);
                    }
                }
                prev_signs[asset] = sign;

                let p = prices[asset].raw();
                let step = (p >> shifts[asset]).max(1);
                let next = match sign {
                    1 => p.saturating_sub(step).max(1),
                    -1 => (p + step).min(MAX_PRICE),
                    _ => p,
                };
                prices[asset] = Price::from_raw(next);
            }

            let probe_due = steps % PROBE_INTERVAL == 0 || all_balanced;
            if probe_due {
                let candidate = self.solver.solve(market, &prices);
                trace!(
                    "tatonnement step {steps}: objective {} (best {})",
                    candidate.objective,
                    best.objective
                );
                if candidate.objective > best.objective {
                    best = candidate.clone();
                    best_prices = prices.clone();
                }
                if candidate.exact {
                    debug!("tatonnement certified exact clearing after {steps} steps");
                    return PriceSearchResult {
                        prices,
                        clearing: candidate,
                    };
                }
                if all_balanced {
                    // Value excess is zero but the solver still trims:
                    // the residual is commission slack; take the best.
                    break;
                }
            }
        }

        debug!(
            "tatonnement stopped after {steps} steps, objective {}",
            best.objective
        );
        PriceSearchResult {
            prices: best_prices,
            clearing: best,
        }
    }
}

/// Wall-clock guard for the price search: raises the shared stop flag
/// after a budget, unless disarmed first.
pub struct PriceComputationTimeout {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
    cancelled: Arc<AtomicBool>,
}

impl PriceComputationTimeout {
    /// Arm a timeout of `budget` over the given stop flag.
    pub fn arm(stop: Arc<AtomicBool>, budget: Duration) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_cancelled = Arc::clone(&cancelled);
        let handle = std::thread::spawn(move || {
            let deadline = std::time::Instant::now() + budget;
            while std::time::Instant::now() < deadline {
                if thread_cancelled.load(Ordering::Relaxed) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            thread_stop.store(true, Ordering::Relaxed);
        });
        PriceComputationTimeout {
            stop,
            handle: Some(handle),
            cancelled,
        }
    }

    /// Disarm without firing (the search finished in time).
    pub fn disarm(mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.stop.store(false, Ordering::Relaxed);
    }
}

impl Drop for PriceComputationTimeout {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::{Offer, OrderbookManager};
    use crate::wire::OfferCategory;

    fn add(m: &OrderbookManager, sell: u16, buy: u16, owner: u64, amount: i64, price: Price) {
        let idx = m.look_up_idx(OfferCategory::new(sell, buy));
        let mut view = m.view();
        view.add_offer(
            idx,
            Offer {
                category: OfferCategory::new(sell, buy),
                owner,
                offer_id: 256,
                amount,
                min_price: price,
            },
        );
    }

    fn oracle() -> TatonnementOracle {
        TatonnementOracle::new(TatonnementConfig {
            smooth_mult: 4,
            tax_rate: 10,
        })
    }

    #[test]
    fn test_empty_market_is_no_trade() {
        let m = OrderbookManager::new(3, 10);
        let market = MarketSnapshot::from_manager(&m);
        let stop = AtomicBool::new(false);
        let result =
            oracle().compute_prices(&market, &[Price::ONE, Price::ONE, Price::ONE], &stop);
        assert_eq!(result.clearing.targets.iter().sum::<u64>(), 0);
    }

    #[test]
    fn test_balanced_market_clears_fully() {
        let m = OrderbookManager::new(2, 10);
        add(&m, 0, 1, 1, 1_000, Price::ONE);
        add(&m, 1, 0, 2, 1_000, Price::ONE);
        m.finish_merges();
        let market = MarketSnapshot::from_manager(&m);
        let stop = AtomicBool::new(false);
        let result = oracle().compute_prices(&market, &[Price::ONE, Price::ONE], &stop);
        assert!(result.clearing.exact);
        assert_eq!(result.clearing.targets.iter().sum::<u64>(), 2_000);
    }

    #[test]
    fn test_skewed_start_converges() {
        let m = OrderbookManager::new(2, 10);
        add(&m, 0, 1, 1, 500, Price::ONE);
        add(&m, 1, 0, 2, 500, Price::ONE);
        m.finish_merges();
        let market = MarketSnapshot::from_manager(&m);
        let stop = AtomicBool::new(false);
        // start with asset 0 wildly overpriced
        let start = vec![Price::from_int(64), Price::ONE];
        let result = oracle().compute_prices(&market, &start, &stop);
        // the search must find prices that move volume
        assert!(result.clearing.objective > 0);
    }

    #[test]
    fn test_stop_flag_is_honored() {
        let m = OrderbookManager::new(2, 10);
        add(&m, 0, 1, 1, 100, Price::from_int(3));
        m.finish_merges();
        let market = MarketSnapshot::from_manager(&m);
        let stop = AtomicBool::new(true);
        // pre-raised stop: the oracle returns immediately with a feasible
        // (possibly no-trade) answer
        let result = oracle().compute_prices(&market, &[Price::ONE, Price::ONE], &stop);
        assert_eq!(result.prices.len(), 2);
    }

    #[test]
    fn test_timeout_fires_and_disarms() {
        let stop = Arc::new(AtomicBool::new(false));
        let guard = PriceComputationTimeout::arm(Arc::clone(&stop), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(60));
        assert!(stop.load(Ordering::Relaxed));
        drop(guard);

        let stop = Arc::new(AtomicBool::new(false));
        let guard = PriceComputationTimeout::arm(Arc::clone(&stop), Duration::from_secs(60));
        guard.disarm();
        assert!(!stop.load(Ordering::Relaxed));
    }
}
