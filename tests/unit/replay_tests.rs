//! Persistence and recovery: replaying an engine from the store plus the
//! decided-block log.

use crate::helpers::*;
use speedex_engine::crypto::KeyPair;
use speedex_engine::persistence::MemKvStore;
use speedex_engine::prelude::*;
use std::sync::Arc;

#[cfg(test)]
mod tests {
    use super::*;

    fn run_three_rounds(engine: &SpeedexEngine) -> Vec<Block> {
        let mut blocks = Vec::new();
        engine.add_txs(vec![payment(0, 256, 1, 0, 500, 15)]);
        blocks.push(propose_and_commit(engine));

        engine.add_txs(vec![
            sell_offer(0, 512, 0, 1, 300, Price::ONE),
            sell_offer(1, 256, 1, 0, 100, Price::ONE),
        ]);
        blocks.push(propose_and_commit(engine));

        engine.add_txs(vec![payment(2, 256, 3, 1, 42, 15)]);
        blocks.push(propose_and_commit(engine));
        blocks
    }

    #[test]
    fn test_replay_reconstructs_engine_state() {
        let (engine, kv) = engine_with_accounts(2, 4, 1_000_000);
        let blocks = run_three_rounds(&engine);
        engine.wait_for_persistence();

        let loader = ReplayLoader {
            config: test_config(2),
            kv: kv.clone() as Arc<dyn KvStore>,
            node_key: KeyPair::for_account(0),
        };
        let recovered = loader.load(&blocks).expect("replay");

        assert_eq!(recovered.committed_round(), 3);
        assert_eq!(
            recovered.db().commitment_root(),
            engine.db().commitment_root()
        );
        for account in 0..4u64 {
            for asset in 0..2u16 {
                assert_eq!(
                    balance(&recovered, account, asset),
                    balance(&engine, account, asset)
                );
            }
        }
        assert_eq!(
            recovered.orderbooks().total_offers(),
            engine.orderbooks().total_offers()
        );
    }

    #[test]
    fn test_replay_is_idempotent() {
        let (engine, kv) = engine_with_accounts(2, 4, 1_000_000);
        let blocks = run_three_rounds(&engine);
        engine.wait_for_persistence();
        drop(engine);

        let load = || {
            ReplayLoader {
                config: test_config(2),
                kv: kv.clone() as Arc<dyn KvStore>,
                node_key: KeyPair::for_account(0),
            }
            .load(&blocks)
            .expect("replay")
        };
        let first = load();
        let root = first.db().commitment_root();
        let offers = first.orderbooks().total_offers();
        drop(first);
        let second = load();
        assert_eq!(second.db().commitment_root(), root);
        assert_eq!(second.orderbooks().total_offers(), offers);
    }

    #[test]
    fn test_replay_covers_unpersisted_tail() {
        // flush every 2 rounds: round 3 exists only in the decided log
        let mut config = test_config(2);
        config.persistence_frequency = 2;
        let kv = Arc::new(MemKvStore::new());
        let (engine, kv) = engine_on_store(config.clone(), kv, 4, 1_000_000);
        let blocks = run_three_rounds(&engine);
        engine.wait_for_persistence();
        let final_root = engine.db().commitment_root();
        drop(engine);

        let recovered = ReplayLoader {
            config,
            kv: kv.clone() as Arc<dyn KvStore>,
            node_key: KeyPair::for_account(0),
        }
        .load(&blocks)
        .expect("replay");
        assert_eq!(recovered.committed_round(), 3);
        assert_eq!(recovered.db().commitment_root(), final_root);
    }

    #[test]
    fn test_replay_rejects_forked_log() {
        let (engine, kv) = engine_with_accounts(2, 4, 1_000_000);
        let mut blocks = run_three_rounds(&engine);
        engine.wait_for_persistence();
        drop(engine);

        // corrupt the decided log at a fully persisted round
        blocks[0].hashed.header_hash = [13u8; 32];
        let result = ReplayLoader {
            config: test_config(2),
            kv: kv.clone() as Arc<dyn KvStore>,
            node_key: KeyPair::for_account(0),
        }
        .load(&blocks);
        assert!(result.is_err());
    }

    #[test]
    fn test_recovered_engine_keeps_producing() {
        let (engine, kv) = engine_with_accounts(2, 4, 1_000_000);
        let blocks = run_three_rounds(&engine);
        engine.wait_for_persistence();
        drop(engine);

        let recovered = ReplayLoader {
            config: test_config(2),
            kv: kv.clone() as Arc<dyn KvStore>,
            node_key: KeyPair::for_account(0),
        }
        .load(&blocks)
        .expect("replay");

        recovered.add_txs(vec![payment(0, 768, 1, 0, 5, 15)]);
        let b4 = propose_and_commit(&recovered);
        assert_eq!(b4.hashed.header.round, 4);
        assert_eq!(b4.transactions.len(), 1);
        assert_eq!(
            b4.hashed.header.prev_hash,
            blocks[2].hashed.header_hash
        );
    }
}
