//! Payments, fees, and sequence-number semantics through full blocks.

use crate::helpers::*;
use speedex_engine::prelude::*;

#[cfg(test)]
mod tests {
    use super::*;

    // --- payment happy path ---

    #[test]
    fn test_payment_happy_path() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        engine.add_txs(vec![payment(0, 256, 1, 0, 500, 15)]);
        let block = propose_and_commit(&engine);

        assert_eq!(block.transactions.len(), 1);
        assert_eq!(balance(&engine, 0, 0), 1_000_000 - 500 - 15);
        assert_eq!(balance(&engine, 1, 0), 1_000_000 + 500);
        let account = engine.db().lookup_user(0).unwrap();
        assert_eq!(account.last_committed_seq(), 256);
    }

    #[test]
    fn test_proposed_block_validates_elsewhere() {
        let (producer, _kv1) = engine_with_accounts(2, 2, 1_000_000);
        let (validator, _kv2) = engine_with_accounts(2, 2, 1_000_000);

        producer.add_txs(vec![payment(0, 256, 1, 0, 500, 15)]);
        let block = producer.propose();

        assert!(validator.exec_block(&block));
        assert_eq!(balance(&validator, 1, 0), 1_000_000 + 500);
        assert_eq!(
            validator.db().commitment_root(),
            producer.db().commitment_root()
        );
    }

    // --- failure unwinding ---

    #[test]
    fn test_insufficient_balance_unwinds_seqno() {
        // account 0: 20 native, 100_000 of asset 1
        let (engine, _kv) = engine_with_accounts(2, 2, 0);
        let account = engine.db().lookup_user(0).unwrap();
        account.asset(0).transfer_available(20);
        account.asset(1).transfer_available(100_000);
        engine.db().commit_values(&[0]);
        drop(account);

        // tx1 pays fee 15 (leaving 5 native); tx2 cannot pay its fee
        engine.add_txs(vec![
            payment(0, 256, 1, 1, 100, 15),
            payment(0, 512, 1, 1, 100, 15),
        ]);
        propose_and_commit(&engine);

        let account = engine.db().lookup_user(0).unwrap();
        assert_eq!(account.last_committed_seq(), 256, "seq 512 must unwind");
        assert_eq!(balance(&engine, 0, 1), 100_000 - 100);
        assert_eq!(balance(&engine, 1, 1), 100);
        assert_eq!(balance(&engine, 0, 0), 5);
        // the failed tx is gone from the mempool, not retained
        engine.wait_for_mempool_maintenance();
        assert_eq!(engine.mempool_size(), 0);
    }

    #[test]
    fn test_duplicate_seq_second_fails_first_unaffected() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        engine.add_txs(vec![
            payment(0, 256, 1, 0, 100, 15),
            payment(0, 256, 1, 0, 900, 15),
        ]);
        propose_and_commit(&engine);

        // exactly one of the two applied
        let sent = 1_000_000 - balance(&engine, 0, 0);
        let received = balance(&engine, 1, 0) - 1_000_000;
        assert!(received == 100 || received == 900);
        assert_eq!(sent, received + 15);
        // the loser was retained as transient, then filtered as stale
        engine.wait_for_mempool_maintenance();
        assert_eq!(engine.mempool_size(), 0);
    }

    // --- fees and format ---

    #[test]
    fn test_fee_bid_too_low_rejected() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        engine.add_txs(vec![payment(0, 256, 1, 0, 500, 14)]);
        let block = propose_and_commit(&engine);
        assert!(block.transactions.is_empty());
        assert_eq!(balance(&engine, 0, 0), 1_000_000);
    }

    #[test]
    fn test_bad_signature_rejected() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        let mut tx = payment(0, 256, 1, 0, 500, 15);
        tx.signature[0] ^= 0xFF;
        engine.add_txs(vec![tx]);
        let block = propose_and_commit(&engine);
        assert!(block.transactions.is_empty());
    }

    #[test]
    fn test_seq_with_reserved_bits_rejected() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        engine.add_txs(vec![payment(0, 257, 1, 0, 500, 15)]);
        let block = propose_and_commit(&engine);
        assert!(block.transactions.is_empty());
    }

    // --- sequence window ---

    #[test]
    fn test_seq_window_bounds() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        let txs: Vec<SignedTransaction> = (1..=65u64)
            .map(|k| payment(0, k * 256, 1, 0, 1, 15))
            .collect();
        engine.add_txs(txs);
        let block = propose_and_commit(&engine);

        // 64 slots fit; the 65th is too far ahead and stays pooled
        assert_eq!(block.transactions.len(), 64);
        let account = engine.db().lookup_user(0).unwrap();
        assert_eq!(account.last_committed_seq(), 64 * 256);
        engine.wait_for_mempool_maintenance();
        assert_eq!(engine.mempool_size(), 1);

        // the window advanced: the straggler clears next round
        let block2 = propose_and_commit(&engine);
        assert_eq!(block2.transactions.len(), 1);
        assert_eq!(engine.mempool_size(), 0);
    }

    #[test]
    fn test_multi_op_transaction_atomic() {
        let (engine, _kv) = engine_with_accounts(2, 3, 1_000);
        // two payments in one tx; the second overdraws, so neither lands
        let tx = signed_tx(
            0,
            256,
            100,
            vec![
                Operation::Payment(PaymentOp {
                    receiver: 1,
                    asset: 1,
                    amount: 600,
                }),
                Operation::Payment(PaymentOp {
                    receiver: 2,
                    asset: 1,
                    amount: 600,
                }),
            ],
        );
        engine.add_txs(vec![tx]);
        let block = propose_and_commit(&engine);
        assert!(block.transactions.is_empty());
        assert_eq!(balance(&engine, 0, 1), 1_000);
        assert_eq!(balance(&engine, 1, 1), 1_000);
        assert_eq!(balance(&engine, 2, 1), 1_000);
    }

    #[test]
    fn test_create_account_lifecycle() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        let new_pk = speedex_engine::crypto::KeyPair::for_account(50).public_key();
        let tx = signed_tx(
            0,
            256,
            100,
            vec![Operation::CreateAccount(
                speedex_engine::wire::CreateAccountOp {
                    new_account_id: 50,
                    new_public_key: new_pk,
                    starting_balance: 1_000,
                },
            )],
        );
        engine.add_txs(vec![tx]);
        propose_and_commit(&engine);

        assert_eq!(balance(&engine, 50, 0), 1_000);
        assert_eq!(balance(&engine, 0, 0), 1_000_000 - 1_000 - 15);

        // the new account can transact in the next round
        engine.add_txs(vec![payment(50, 256, 0, 0, 10, 15)]);
        let block = propose_and_commit(&engine);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(balance(&engine, 50, 0), 1_000 - 10 - 15);
    }

    #[test]
    fn test_duplicate_account_creation_rejected() {
        let (engine, _kv) = engine_with_accounts(2, 2, 1_000_000);
        let tx = signed_tx(
            0,
            256,
            100,
            vec![Operation::CreateAccount(
                speedex_engine::wire::CreateAccountOp {
                    new_account_id: 1,
                    new_public_key: [7u8; 32],
                    starting_balance: 1_000,
                },
            )],
        );
        engine.add_txs(vec![tx]);
        let block = propose_and_commit(&engine);
        assert!(block.transactions.is_empty());
        assert_eq!(balance(&engine, 0, 0), 1_000_000);
    }
}
