//! Shared fixtures: engines over an in-memory store, deterministic
//! keys, and transaction builders.

use speedex_engine::crypto::KeyPair;
use speedex_engine::persistence::MemKvStore;
use speedex_engine::prelude::*;
use std::sync::Arc;
use std::time::Duration;

/// Engine parameters tuned for fast tests.
pub fn test_config(num_assets: u16) -> EngineConfig {
    EngineConfig {
        num_assets,
        tax_rate: 10,
        smooth_mult: 4,
        block_size: 10_000,
        persistence_frequency: 1,
        num_account_db_shards: 4,
        max_seqs_per_block: 64,
        mempool_target_chunk_size: 100,
        max_mempool_size: 100_000,
        // generous so slow CI never truncates the search mid-test
        price_search_budget: Duration::from_secs(5),
        flags: EngineFlags::CHECK_SIGS | EngineFlags::DETAILED_MOD_LOG,
        diagnostics_dir: None,
    }
}

/// Genesis accounts `0..count`, each holding `balance` of every asset,
/// with deterministic keys.
pub fn engine_with_accounts(
    num_assets: u16,
    count: u64,
    balance: i64,
) -> (SpeedexEngine, Arc<MemKvStore>) {
    engine_on_store(
        test_config(num_assets),
        Arc::new(MemKvStore::new()),
        count,
        balance,
    )
}

/// Same, over a caller-supplied store (for replay tests).
pub fn engine_on_store(
    config: EngineConfig,
    kv: Arc<MemKvStore>,
    count: u64,
    balance: i64,
) -> (SpeedexEngine, Arc<MemKvStore>) {
    let num_assets = config.num_assets;
    let engine = SpeedexEngine::new(config, kv.clone() as Arc<dyn KvStore>, KeyPair::for_account(0))
        .expect("engine construction");
    let accounts: Vec<(AccountId, [u8; 32])> = (0..count)
        .map(|id| (id, KeyPair::for_account(id).public_key()))
        .collect();
    engine
        .install_genesis(&accounts, |acct| {
            for asset in 0..num_assets {
                acct.asset(asset).transfer_available(balance);
                acct.asset(asset).commit();
            }
        })
        .expect("genesis install");
    (engine, kv)
}

/// Build and sign a transaction under the source's deterministic key.
pub fn signed_tx(source: AccountId, seq: u64, max_fee: u64, ops: Vec<Operation>) -> SignedTransaction {
    KeyPair::for_account(source).sign_tx(Transaction {
        metadata: TxMetadata {
            source_account: source,
            sequence_number: seq,
            max_fee,
        },
        operations: ops,
    })
}

/// A single-payment transaction.
pub fn payment(
    source: AccountId,
    seq: u64,
    receiver: AccountId,
    asset: AssetId,
    amount: i64,
    max_fee: u64,
) -> SignedTransaction {
    signed_tx(
        source,
        seq,
        max_fee,
        vec![Operation::Payment(PaymentOp {
            receiver,
            asset,
            amount,
        })],
    )
}

/// A single-sell-offer transaction.
pub fn sell_offer(
    source: AccountId,
    seq: u64,
    sell: AssetId,
    buy: AssetId,
    amount: i64,
    min_price: Price,
) -> SignedTransaction {
    signed_tx(
        source,
        seq,
        100,
        vec![Operation::CreateSellOffer(
            speedex_engine::wire::CreateSellOfferOp {
                category: OfferCategory::new(sell, buy),
                amount,
                min_price,
            },
        )],
    )
}

/// A single-cancel transaction. `offer_id` is the creating op's id.
pub fn cancel_offer(
    source: AccountId,
    seq: u64,
    sell: AssetId,
    buy: AssetId,
    min_price: Price,
    offer_id: u64,
) -> SignedTransaction {
    signed_tx(
        source,
        seq,
        100,
        vec![Operation::CancelSellOffer(
            speedex_engine::wire::CancelSellOfferOp {
                category: OfferCategory::new(sell, buy),
                min_price,
                offer_id,
            },
        )],
    )
}

/// Propose a block and immediately commit it.
pub fn propose_and_commit(engine: &SpeedexEngine) -> Block {
    let block = engine.propose();
    engine.commit_decision(block.hashed.header_hash);
    block
}

/// Balance lookup shorthand.
pub fn balance(engine: &SpeedexEngine, account: AccountId, asset: AssetId) -> i64 {
    engine
        .db()
        .lookup_available_balance(account, asset)
        .expect("account exists")
}

/// The post-commission payout for `amount` at price parity and the test
/// tax rate.
pub fn taxed(amount: i64) -> i64 {
    amount * 1023 / 1024
}
