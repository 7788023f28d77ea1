//! Block-level contracts: propose/exec symmetry, continuity checks, and
//! rewind.

use crate::helpers::*;
use speedex_engine::prelude::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mempool_yields_trivial_block() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        let block = propose_and_commit(&engine);
        assert_eq!(block.hashed.header.round, 1);
        assert!(block.transactions.is_empty());
        assert_eq!(
            block.hashed.header.clearing_details.iter().map(|d| d.sold_amount).sum::<u64>(),
            0
        );

        // a trivial block still validates elsewhere
        let (validator, _kv2) = engine_with_accounts(2, 2, 1_000_000);
        assert!(validator.exec_block(&block));
    }

    #[test]
    fn test_chain_of_blocks_links_hashes() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        let b1 = propose_and_commit(&engine);
        engine.add_txs(vec![payment(0, 256, 1, 0, 10, 15)]);
        let b2 = propose_and_commit(&engine);
        assert_eq!(b2.hashed.header.round, 2);
        assert_eq!(b2.hashed.header.prev_hash, b1.hashed.header_hash);
        assert_eq!(engine.committed_round(), 2);
    }

    #[test]
    fn test_exec_rejects_wrong_round_or_prev_hash() {
        let (producer, _kv1) = engine_with_accounts(2, 2, 1_000_000);
        let b1 = producer.propose();

        let (validator, _kv2) = engine_with_accounts(2, 2, 1_000_000);
        assert!(validator.exec_block(&b1));
        // replaying the same block on top of itself must fail (round)
        assert!(!validator.exec_block(&b1));

        // a block with a forged prev hash fails
        producer.add_txs(vec![payment(0, 256, 1, 0, 10, 15)]);
        let mut b2 = producer.propose();
        b2.hashed.header.prev_hash = [9u8; 32];
        b2.hashed.header_hash = b2.hashed.header.hash();
        assert!(!validator.exec_block(&b2));
    }

    #[test]
    fn test_exec_rejects_tampered_body() {
        let (producer, _kv1) = engine_with_accounts(2, 2, 1_000_000);
        producer.add_txs(vec![payment(0, 256, 1, 0, 500, 15)]);
        let mut block = producer.propose();

        // swap the payment for a bigger one without re-sealing anything
        block.transactions[0] = payment(0, 256, 1, 0, 9_999, 15);
        let (validator, _kv2) = engine_with_accounts(2, 2, 1_000_000);
        assert!(!validator.exec_block(&block));
        // rollback left no residue
        assert_eq!(balance(&validator, 1, 0), 1_000_000);
        assert_eq!(validator.db().lookup_user(0).unwrap().last_committed_seq(), 0);
    }

    #[test]
    fn test_exec_rejects_tampered_account_root() {
        let (producer, _kv1) = engine_with_accounts(2, 2, 1_000_000);
        producer.add_txs(vec![payment(0, 256, 1, 0, 500, 15)]);
        let mut block = producer.propose();
        block.hashed.header.state_root_hashes.accounts = [3u8; 32];
        block.hashed.header_hash = block.hashed.header.hash();

        let (validator, _kv2) = engine_with_accounts(2, 2, 1_000_000);
        assert!(!validator.exec_block(&block));
        assert_eq!(balance(&validator, 0, 0), 1_000_000);
    }

    #[test]
    fn test_commit_decision_is_idempotent() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        let block = engine.propose();
        engine.commit_decision(block.hashed.header_hash);
        engine.commit_decision(block.hashed.header_hash);
        assert_eq!(engine.committed_round(), 1);
    }

    #[test]
    fn test_rewind_abandons_speculative_rounds() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        engine.add_txs(vec![payment(0, 256, 1, 0, 500, 15)]);
        let b1 = engine.propose();
        engine.commit_decision(b1.hashed.header_hash);
        let committed_root = engine.db().commitment_root();

        // speculative round 2 that consensus never commits
        engine.add_txs(vec![payment(0, 512, 1, 0, 700, 15)]);
        let _b2 = engine.propose();
        assert_eq!(engine.applied_round(), 2);
        assert_ne!(engine.db().commitment_root(), committed_root);

        engine.rewind_to_last_commit().expect("rewind");
        assert_eq!(engine.applied_round(), 1);
        assert_eq!(engine.committed_round(), 1);
        assert_eq!(engine.db().commitment_root(), committed_root);
        assert_eq!(balance(&engine, 0, 0), 1_000_000 - 515);

        // the engine keeps working after a rewind
        engine.add_txs(vec![payment(0, 512, 1, 0, 700, 15)]);
        let b2 = propose_and_commit(&engine);
        assert_eq!(b2.hashed.header.round, 2);
        assert_eq!(b2.hashed.header.prev_hash, b1.hashed.header_hash);
        assert_eq!(balance(&engine, 0, 0), 1_000_000 - 515 - 715);
    }

    #[test]
    fn test_header_map_tracks_chain() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        let b1 = propose_and_commit(&engine);
        let b2 = propose_and_commit(&engine);
        // the round-2 header committed to the map holding exactly round 1
        let map = HeaderHashMap::new();
        map.insert_for_production(1, b1.hashed.header_hash);
        assert_eq!(map.hash(), b2.hashed.header.state_root_hashes.header_map);
    }
}
