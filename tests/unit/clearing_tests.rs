//! Offer lifecycle and batch clearing through full blocks.

use crate::helpers::*;
use speedex_engine::prelude::*;

#[cfg(test)]
mod tests {
    use super::*;

    // --- offer lifecycle ---

    #[test]
    fn test_cancel_before_clear_restores_book_root() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        let idx = engine
            .orderbooks()
            .look_up_idx(OfferCategory::new(1, 0));
        let empty_root = engine.orderbooks().book(idx).hash();

        // B1: a lone offer rests (one-sided market cannot clear)
        engine.add_txs(vec![sell_offer(0, 256, 1, 0, 100, Price::ONE)]);
        let b1 = propose_and_commit(&engine);
        assert_eq!(b1.transactions.len(), 1);
        assert_eq!(balance(&engine, 0, 1), 1_000_000 - 100);
        assert_ne!(engine.orderbooks().book(idx).hash(), empty_root);

        // B2: cancel returns the escrow and the root reverts
        engine.add_txs(vec![cancel_offer(0, 512, 1, 0, Price::ONE, 256)]);
        let b2 = propose_and_commit(&engine);
        assert_eq!(b2.transactions.len(), 1);
        assert_eq!(balance(&engine, 0, 1), 1_000_000);
        assert_eq!(engine.orderbooks().book(idx).hash(), empty_root);
    }

    #[test]
    fn test_cancel_missing_offer_fails_tx() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        engine.add_txs(vec![cancel_offer(0, 256, 1, 0, Price::ONE, 256)]);
        let block = propose_and_commit(&engine);
        assert!(block.transactions.is_empty());
        assert_eq!(balance(&engine, 0, 1), 1_000_000);
    }

    // --- two-sided clearing ---

    #[test]
    fn test_two_asset_cross_clears_fully() {
        let (engine, _kv) = engine_with_accounts(2, 20, 1_000_000);
        let mut txs = Vec::new();
        for acct in 0..10u64 {
            txs.push(sell_offer(acct, 256, 0, 1, 100, Price::ONE));
        }
        for acct in 10..20u64 {
            txs.push(sell_offer(acct, 256, 1, 0, 100, Price::ONE));
        }
        engine.add_txs(txs);
        let block = propose_and_commit(&engine);
        assert_eq!(block.transactions.len(), 20);

        // every offer cleared
        assert_eq!(engine.orderbooks().total_offers(), 0);
        let sold: u64 = block
            .hashed
            .header
            .clearing_details
            .iter()
            .map(|d| d.sold_amount)
            .sum();
        assert_eq!(sold, 2_000);

        // sellers of asset 0 gave 100 of it and got the mirror, less
        // the commission
        for acct in 0..10u64 {
            assert_eq!(balance(&engine, acct, 0), 1_000_000 - 100 - 15);
            assert_eq!(balance(&engine, acct, 1), 1_000_000 + taxed(100));
        }
        for acct in 10..20u64 {
            assert_eq!(balance(&engine, acct, 1), 1_000_000 - 100);
            assert_eq!(balance(&engine, acct, 0), 1_000_000 + taxed(100) - 15);
        }
    }

    #[test]
    fn test_conservation_modulo_fees_and_commission() {
        let (engine, _kv) = engine_with_accounts(2, 20, 1_000_000);
        let mut txs = Vec::new();
        for acct in 0..10u64 {
            txs.push(sell_offer(acct, 256, 0, 1, 100, Price::ONE));
            txs.push(sell_offer(acct + 10, 256, 1, 0, 100, Price::ONE));
        }
        engine.add_txs(txs);
        propose_and_commit(&engine);

        let total_fees = 20 * 15i64;
        let commission_per_side = 10 * (100 - taxed(100));
        for asset in 0..2u16 {
            let delta: i64 = (0..20u64)
                .map(|acct| balance(&engine, acct, asset) - 1_000_000)
                .sum();
            let burned_fees = if asset == 0 { total_fees } else { 0 };
            assert_eq!(
                delta,
                -(burned_fees + commission_per_side),
                "asset {asset} conservation"
            );
        }
    }

    #[test]
    fn test_imbalanced_market_partially_clears() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        engine.add_txs(vec![
            sell_offer(0, 256, 0, 1, 300, Price::ONE),
            sell_offer(1, 256, 1, 0, 100, Price::ONE),
        ]);
        let block = propose_and_commit(&engine);
        assert_eq!(block.transactions.len(), 2);

        let idx01 = engine
            .orderbooks()
            .look_up_idx(OfferCategory::new(0, 1));
        let details = &block.hashed.header.clearing_details;
        // the 300-offer cannot all be paid for by 100 of asset 1
        assert!(details[idx01].sold_amount < 300);
        assert!(details[idx01].sold_amount > 0);
        // the straddling remainder still rests
        assert_eq!(engine.orderbooks().total_offers(), 1);

        // and an independent validator accepts the block
        let (validator, _kv2) = engine_with_accounts(2, 2, 1_000_000);
        assert!(validator.exec_block(&block));
        assert_eq!(
            validator.db().commitment_root(),
            engine.db().commitment_root()
        );
    }

    #[test]
    fn test_tampered_clearing_volume_rejected() {
        let (engine, _kv) = engine_with_accounts(2, 20, 1_000_000);
        let mut txs = Vec::new();
        for acct in 0..10u64 {
            txs.push(sell_offer(acct, 256, 0, 1, 100, Price::ONE));
            txs.push(sell_offer(acct + 10, 256, 1, 0, 100, Price::ONE));
        }
        engine.add_txs(txs);
        let mut block = engine.propose();

        let (validator, _kv2) = engine_with_accounts(2, 20, 1_000_000);
        let idx = engine
            .orderbooks()
            .look_up_idx(OfferCategory::new(0, 1));
        block.hashed.header.clearing_details[idx].sold_amount -= 1;
        block.hashed.header_hash = block.hashed.header.hash();
        assert!(!validator.exec_block(&block));
        // rollback left the validator pristine
        assert_eq!(balance(&validator, 0, 0), 1_000_000);
        assert_eq!(validator.orderbooks().total_offers(), 0);
    }

    // --- determinism ---

    #[test]
    fn test_header_hash_independent_of_thread_count() {
        let build_and_propose = || {
            let (engine, _kv) = engine_with_accounts(3, 20, 1_000_000);
            let mut txs = Vec::new();
            for acct in 0..10u64 {
                txs.push(sell_offer(acct, 256, 0, 1, 100, Price::ONE));
                txs.push(sell_offer(acct + 10, 256, 1, 0, 100, Price::ONE));
            }
            for acct in 0..5u64 {
                txs.push(payment(acct, 512, acct + 1, 2, 50, 15));
            }
            engine.add_txs(txs);
            engine.propose().hashed.header_hash
        };

        let multi = build_and_propose();
        let single_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap();
        let single = single_pool.install(build_and_propose);
        assert_eq!(multi, single);
    }
}
