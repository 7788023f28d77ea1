//! The block assembler: ties transaction processing, price computation,
//! clearing, commitments, and persistence into the engine API the
//! consensus adapter drives.

use super::config::EngineConfig;
use super::hash_log::HashLog;
use super::header_map::HeaderHashMap;
use super::rollback::BlockApplyGuard;
use super::EngineError;
use crate::accounts::{AccountDatabase, TransferLog};
use crate::crypto::{KeyPair, ShardRouter};
use crate::mempool::{Mempool, MempoolCleanerWorker, MempoolFilterWorker, MempoolTransactionFilter};
use crate::modlog::{LogMergeWorker, ModificationLog};
use crate::orderbook::{OrderbookManager, OrderbookThunk};
use crate::persistence::{
    load_accounts, load_header_map, load_orderbooks, KvStore, PersistJob, PersistencePipeline,
    StoreSet, HASH_KEY_RECORD,
};
use crate::prices::{
    LpSolver, MarketSnapshot, PriceComputationTimeout, TatonnementConfig, TatonnementOracle,
};
use crate::processing::{produce_tx_block, replay_tx_block};
use crate::wire::{
    AccountId, Block, Hash, HashedBlock, Header, Price, PublicKeyBytes, Round, StateRootHashes,
    BASE_FEE_PER_TX,
};
use crate::engine::config::EngineFlags;
use rand::RngCore;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

struct ChainState {
    /// Speculative head: the highest applied round.
    applied_round: Round,
    /// Highest round the consensus layer has committed.
    committed_round: Round,
    /// Header hash of the applied head (zero at genesis).
    prev_hash: Hash,
    /// Warm-start prices for the next search.
    last_prices: Vec<Price>,
    /// Applied blocks not yet safely persisted, oldest first.
    recent_blocks: Vec<Block>,
    /// Orderbook write thunks awaiting a persistence flush.
    pending_book_thunks: Vec<OrderbookThunk>,
}

/// The batch settlement engine.
///
/// `propose` and `exec_block` are called one at a time by the consensus
/// adapter; `commit_decision` finalizes a round and drives persistence;
/// `rewind_to_last_commit` abandons speculative rounds by reloading from
/// the store and replaying committed blocks.
pub struct SpeedexEngine {
    config: EngineConfig,
    kv: Arc<dyn KvStore>,
    stores: StoreSet,
    db: Arc<AccountDatabase>,
    manager: Arc<OrderbookManager>,
    modlog: Arc<ModificationLog>,
    mempool: Arc<Mempool>,
    header_map: Arc<HeaderHashMap>,
    oracle: TatonnementOracle,
    merge_worker: LogMergeWorker,
    filter_worker: MempoolFilterWorker,
    cleaner_worker: MempoolCleanerWorker,
    pipeline: PersistencePipeline,
    node_key: KeyPair,
    stop_flag: Arc<AtomicBool>,
    hash_log: Option<HashLog>,
    chain: Mutex<ChainState>,
}

impl SpeedexEngine {
    /// Build an engine over a store. The account-shard routing key is
    /// read from the store, or generated and persisted on first start.
    pub fn new(
        config: EngineConfig,
        kv: Arc<dyn KvStore>,
        node_key: KeyPair,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let stores = StoreSet::open(kv.as_ref(), config.num_account_db_shards)?;

        let hash_key = match kv.get(stores.account_shards[0], HASH_KEY_RECORD)? {
            Some(bytes) => bytes.as_slice().try_into().map_err(|_| {
                EngineError::CorruptState("persisted hash key has wrong width".into())
            })?,
            None => {
                let mut key = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut key);
                kv.write(
                    stores.account_shards[0],
                    &[(HASH_KEY_RECORD.to_vec(), key.to_vec())],
                    &[],
                )?;
                key
            }
        };
        let router = ShardRouter::new(hash_key, config.num_account_db_shards);

        let transfer_log = config
            .flags
            .contains(EngineFlags::TRANSFER_DIAGNOSTICS)
            .then(|| TransferLog::new(config.diagnostics_dir.clone()));
        let db = Arc::new(AccountDatabase::new(
            router,
            config.num_assets as usize,
            config.max_seqs_per_block,
            transfer_log,
        ));
        let manager = Arc::new(OrderbookManager::new(
            config.num_assets as usize,
            config.tax_rate,
        ));
        let modlog = Arc::new(ModificationLog::new(
            config.flags.contains(EngineFlags::DETAILED_MOD_LOG),
        ));
        let mempool = Arc::new(Mempool::new(
            config.mempool_target_chunk_size,
            config.max_mempool_size,
        ));

        let merge_worker = LogMergeWorker::new(Arc::clone(&modlog));
        let filter_worker = MempoolFilterWorker::new(
            Arc::clone(&mempool),
            MempoolTransactionFilter::new(Arc::clone(&db)),
        );
        let cleaner_worker = MempoolCleanerWorker::new(Arc::clone(&mempool));
        let pipeline = PersistencePipeline::new(Arc::clone(&kv), stores.clone());

        let oracle = TatonnementOracle::new(TatonnementConfig {
            smooth_mult: config.smooth_mult,
            tax_rate: config.tax_rate,
        });
        let hash_log = config
            .flags
            .contains(EngineFlags::HASH_DIAGNOSTICS)
            .then(|| HashLog::new(config.diagnostics_dir.clone()));
        let num_assets = config.num_assets as usize;

        Ok(SpeedexEngine {
            config,
            kv,
            stores,
            db,
            manager,
            modlog,
            mempool,
            header_map: Arc::new(HeaderHashMap::new()),
            oracle,
            merge_worker,
            filter_worker,
            cleaner_worker,
            pipeline,
            node_key,
            stop_flag: Arc::new(AtomicBool::new(false)),
            hash_log,
            chain: Mutex::new(ChainState {
                applied_round: 0,
                committed_round: 0,
                prev_hash: [0u8; 32],
                last_prices: vec![Price::ONE; num_assets],
                recent_blocks: Vec::new(),
                pending_book_thunks: Vec::new(),
            }),
        })
    }

    /// Install the genesis account set and persist it synchronously so a
    /// restart can always rebuild round 0.
    pub fn install_genesis<F>(
        &self,
        accounts: &[(AccountId, PublicKeyBytes)],
        init: F,
    ) -> Result<Hash, EngineError>
    where
        F: Fn(&crate::accounts::UserAccount) + Sync,
    {
        let root = self.db.install_genesis_accounts(accounts, init);
        let num_shards = self.stores.account_shards.len();
        let mut per_shard: Vec<Vec<(Vec<u8>, Vec<u8>)>> = vec![Vec::new(); num_shards];
        for (id, _) in accounts {
            let account = self
                .db
                .lookup_user(*id)
                .expect("genesis account just installed");
            per_shard[self.db.shard_of(*id)].push((
                id.to_be_bytes().to_vec(),
                crate::wire::Xdr::to_xdr_bytes(&account.produce_commitment()),
            ));
        }
        for (shard, puts) in per_shard.iter().enumerate() {
            self.kv.write(self.stores.account_shards[shard], puts, &[])?;
        }
        self.kv.sync()?;
        info!("installed {} genesis accounts", accounts.len());
        Ok(root)
    }

    /// Feed pending transactions into the mempool intake buffer.
    pub fn add_txs(&self, txs: Vec<crate::wire::SignedTransaction>) {
        self.mempool.chunkify_and_add_to_buffer(txs);
    }

    /// Pending transactions (pool plus intake buffer).
    pub fn mempool_size(&self) -> u64 {
        self.mempool.total_size()
    }

    /// The account database (read surface for tests and tooling).
    pub fn db(&self) -> &AccountDatabase {
        &self.db
    }

    /// The orderbook manager (read surface for tests and tooling).
    pub fn orderbooks(&self) -> &OrderbookManager {
        &self.manager
    }

    /// Highest applied round.
    pub fn applied_round(&self) -> Round {
        self.chain.lock().unwrap().applied_round
    }

    /// Highest committed round.
    pub fn committed_round(&self) -> Round {
        self.chain.lock().unwrap().committed_round
    }

    /// Produce the next block from the mempool. An empty mempool yields
    /// a trivial (empty) block.
    pub fn propose(&self) -> Block {
        let mut chain = self.chain.lock().unwrap();
        let round = chain.applied_round + 1;
        self.modlog.clear();

        let stats = produce_tx_block(
            &self.mempool,
            &self.db,
            &self.manager,
            &self.modlog,
            Some(&self.merge_worker),
            self.config.check_sigs(),
            self.config.block_size,
        );

        let market = MarketSnapshot::from_manager(&self.manager);
        self.stop_flag
            .store(false, std::sync::atomic::Ordering::Relaxed);
        let timeout = PriceComputationTimeout::arm(
            Arc::clone(&self.stop_flag),
            self.config.price_search_budget,
        );
        let search = self
            .oracle
            .compute_prices(&market, &chain.last_prices, &self.stop_flag);
        timeout.disarm();

        // Solver targets are feasible for the books they were computed
        // from, and the phase ordering freezes the books during the
        // search; a rejection here is an invariant breach.
        let summary = self
            .manager
            .clear_offers_apply(
                &search.prices,
                &search.clearing.targets,
                &self.db,
                &self.modlog,
            )
            .expect("solver-produced clearing targets must be feasible");

        let dirty = self.modlog.dirty_accounts();
        self.db.commit_new_accounts(round);
        self.db.commit_values(&dirty);
        debug_assert!(self.db.check_valid_state(&dirty));
        let account_root = self.db.produce_state_commitment(&dirty);

        let header = Header {
            round,
            prev_hash: chain.prev_hash,
            fee_rate: BASE_FEE_PER_TX as u64,
            prices: search.prices.clone(),
            clearing_details: summary.details.clone(),
            state_root_hashes: StateRootHashes {
                accounts: account_root,
                orderbooks: OrderbookManager::clearing_commitment(&summary.details),
                header_map: self.header_map.hash(),
            },
        };
        let header_hash = header.hash();
        let producer_signature = self.node_key.sign(&header_hash);
        let transactions = self.modlog.accumulate_tx_list();

        self.db.add_persistence_thunk(round, &dirty);
        chain
            .pending_book_thunks
            .extend(self.manager.commit_round(round));
        self.header_map.insert_for_production(round, header_hash);
        self.record_state_hashes(round, &header);
        self.db.flush_transfer_log(round);
        self.cleaner_worker.poke();
        self.filter_worker.poke();

        debug!(
            "proposed round {round}: {} txs, {} new offers, {} payments",
            stats.accepted_tx_count, stats.new_offer_count, stats.payment_count
        );

        chain.applied_round = round;
        chain.prev_hash = header_hash;
        chain.last_prices = search.prices;
        let block = Block {
            hashed: HashedBlock {
                header,
                header_hash,
                producer_signature,
            },
            transactions,
        };
        chain.recent_blocks.push(block.clone());
        block
    }

    /// Validate and apply a block produced elsewhere on top of the
    /// current head. On failure every tentative effect is rolled back
    /// and false is returned.
    pub fn exec_block(&self, block: &Block) -> bool {
        let mut chain = self.chain.lock().unwrap();
        self.exec_block_locked(&mut chain, block, self.config.check_sigs())
    }

    fn exec_block_locked(
        &self,
        chain: &mut MutexGuard<'_, ChainState>,
        block: &Block,
        check_sigs: bool,
    ) -> bool {
        let header = &block.hashed.header;
        let round = header.round;
        if round != chain.applied_round + 1 {
            warn!(
                "exec_block round {} does not extend head {}",
                round, chain.applied_round
            );
            return false;
        }
        if header.prev_hash != chain.prev_hash {
            warn!("exec_block prev-hash mismatch at round {round}");
            return false;
        }
        if block.hashed.header_hash != header.hash() {
            warn!("exec_block header-hash mismatch at round {round}");
            return false;
        }
        if header.prices.len() != self.config.num_assets as usize
            || header.prices.iter().any(|p| !p.is_valid())
            || header.clearing_details.len() != self.manager.num_pairs()
        {
            return false;
        }
        if self.header_map.hash() != header.state_root_hashes.header_map {
            warn!("exec_block header-map root mismatch at round {round}");
            return false;
        }

        self.modlog.clear();
        let guard = BlockApplyGuard::new(&self.db, &self.manager, &self.modlog, chain.applied_round);

        let (replay_ok, _stats) = replay_tx_block(
            &self.db,
            &self.manager,
            &self.modlog,
            &block.transactions,
            check_sigs,
        );
        if !replay_ok {
            return false;
        }

        // The producer's clearing volumes must be exactly what the
        // deterministic solver derives from these books at these prices.
        let market = MarketSnapshot::from_manager(&self.manager);
        let expected = LpSolver::new(self.config.tax_rate).solve(&market, &header.prices);
        let claimed: Vec<u64> = header
            .clearing_details
            .iter()
            .map(|d| d.sold_amount)
            .collect();
        if expected.targets != claimed {
            warn!("exec_block clearing-volume mismatch at round {round}");
            return false;
        }

        let Some(summary) =
            self.manager
                .clear_offers_apply(&header.prices, &claimed, &self.db, &self.modlog)
        else {
            return false;
        };
        for (ours, theirs) in summary.details.iter().zip(header.clearing_details.iter()) {
            if ours.root_hash != theirs.root_hash {
                warn!("exec_block orderbook root mismatch at round {round}");
                return false;
            }
        }
        if OrderbookManager::clearing_commitment(&summary.details)
            != header.state_root_hashes.orderbooks
        {
            return false;
        }

        let dirty = self.modlog.dirty_accounts();
        if !self.db.check_valid_state(&dirty) {
            warn!("exec_block left an account overdrawn at round {round}");
            return false;
        }
        let tentative_root = self.db.tentative_produce_state_commitment(&dirty);
        if tentative_root != header.state_root_hashes.accounts {
            warn!("exec_block account root mismatch at round {round}");
            return false;
        }

        // Everything checked out: commit for real.
        self.db.commit_new_accounts(round);
        self.db.commit_values(&dirty);
        let final_root = self.db.produce_state_commitment(&dirty);
        debug_assert_eq!(final_root, tentative_root);
        guard.finalize_commit();

        self.db.add_persistence_thunk(round, &dirty);
        chain
            .pending_book_thunks
            .extend(self.manager.commit_round(round));
        self.header_map
            .insert_for_production(round, block.hashed.header_hash);
        self.record_state_hashes(round, header);
        self.db.flush_transfer_log(round);
        self.filter_worker.poke();

        chain.applied_round = round;
        chain.prev_hash = block.hashed.header_hash;
        chain.last_prices = header.prices.clone();
        chain.recent_blocks.push(block.clone());
        debug!("executed round {round}");
        true
    }

    /// Mark a block as decided. Idempotent; advances the committed round
    /// and, at the configured cadence, flushes thunks into the
    /// persistence pipeline (phase 0 runs synchronously here).
    pub fn commit_decision(&self, block_hash: Hash) {
        let mut chain = self.chain.lock().unwrap();
        let already = chain
            .recent_blocks
            .iter()
            .any(|b| b.hashed.header_hash == block_hash
                && b.hashed.header.round <= chain.committed_round);
        if already {
            return;
        }
        let next = chain.committed_round + 1;
        let matches_next = chain
            .recent_blocks
            .iter()
            .any(|b| b.hashed.header.round == next && b.hashed.header_hash == block_hash);
        if !matches_next {
            warn!("commit_decision for unknown block hash; ignoring");
            return;
        }
        chain.committed_round = next;
        debug!("committed round {next}");

        if next % self.config.persistence_frequency == 0 {
            self.flush_persistence(&mut chain);
        }
    }

    fn flush_persistence(&self, chain: &mut MutexGuard<'_, ChainState>) {
        let up_to = chain.committed_round;
        let account_thunks = self.db.take_persistence_thunks(up_to);
        let keep = chain
            .pending_book_thunks
            .iter()
            .position(|t| t.round > up_to)
            .unwrap_or(chain.pending_book_thunks.len());
        let book_thunks: Vec<OrderbookThunk> = chain.pending_book_thunks.drain(..keep).collect();
        let header_entries = self.header_map.take_pending(up_to);
        if account_thunks.is_empty() && book_thunks.is_empty() && header_entries.is_empty() {
            return;
        }
        let db = Arc::clone(&self.db);
        let job = PersistJob::from_thunks(
            up_to,
            account_thunks,
            move |id| db.shard_of(id),
            self.stores.account_shards.len(),
            book_thunks,
            header_entries,
        );
        self.pipeline.submit(job);

        // Blocks below the durably persisted floor are no longer needed
        // for rewind replay; drop them. The floor lags the flush we just
        // submitted, so this keeps at least one flush period of blocks.
        if let (Ok(a), Ok(b), Ok(h)) = (
            self.stores.account_persisted_round(self.kv.as_ref()),
            self.stores.orderbook_persisted_round(self.kv.as_ref()),
            self.stores.header_persisted_round(self.kv.as_ref()),
        ) {
            let floor = a.min(b).min(h);
            chain
                .recent_blocks
                .retain(|blk| blk.hashed.header.round > floor);
        }
    }

    /// Block until every flushed round is durably stored.
    pub fn wait_for_persistence(&self) {
        self.pipeline.wait_for_async_persist();
    }

    /// Block until background mempool filtering/compaction settles
    /// (tests and shutdown).
    pub fn wait_for_mempool_maintenance(&self) {
        self.filter_worker.wait_idle();
        self.cleaner_worker.wait_idle();
    }

    fn record_state_hashes(&self, round: Round, header: &Header) {
        let Some(log) = &self.hash_log else { return };
        log.log("accounts", header.state_root_hashes.accounts);
        log.log("orderbooks", header.state_root_hashes.orderbooks);
        log.log("header_map", header.state_root_hashes.header_map);
        for (idx, detail) in header.clearing_details.iter().enumerate() {
            log.log(format!("book_{idx}"), detail.root_hash);
        }
        log.flush_round(round);
    }

    /// Abandon speculative rounds: reload state from the store and
    /// replay committed blocks on top of it.
    pub fn rewind_to_last_commit(&self) -> Result<(), EngineError> {
        let mut chain = self.chain.lock().unwrap();
        let committed = chain.committed_round;
        info!(
            "rewinding from applied round {} to committed round {committed}",
            chain.applied_round
        );
        self.pipeline.wait_for_async_persist();
        let committed_blocks: Vec<Block> = chain
            .recent_blocks
            .iter()
            .filter(|b| b.hashed.header.round <= committed)
            .cloned()
            .collect();
        self.reload_and_replay(&mut chain, &committed_blocks, committed)
    }

    /// Recover engine state at startup from the store plus the decided
    /// block log.
    pub fn replay_from_log(&self, decided_blocks: &[Block]) -> Result<(), EngineError> {
        let mut chain = self.chain.lock().unwrap();
        let target = decided_blocks
            .last()
            .map(|b| b.hashed.header.round)
            .unwrap_or(0);
        self.reload_and_replay(&mut chain, decided_blocks, target)
    }

    fn reload_and_replay(
        &self,
        chain: &mut MutexGuard<'_, ChainState>,
        decided_blocks: &[Block],
        target_round: Round,
    ) -> Result<(), EngineError> {
        let acct_round = self.stores.account_persisted_round(self.kv.as_ref())?;
        let book_round = self.stores.orderbook_persisted_round(self.kv.as_ref())?;
        let header_round = self.stores.header_persisted_round(self.kv.as_ref())?;
        debug!(
            "reload: persisted rounds accounts={acct_round} books={book_round} headers={header_round}"
        );

        // Rebuild in-memory state from the store.
        self.db.clear_all();
        self.manager.clear_all();
        self.header_map.clear_all();
        self.modlog.clear();
        chain.pending_book_thunks.clear();

        let mut commitments = Vec::new();
        load_accounts(self.kv.as_ref(), &self.stores, |c| commitments.push(c))?;
        self.db.install_loaded_accounts(commitments);
        load_orderbooks(self.kv.as_ref(), &self.stores, |offer| {
            self.manager.install_loaded_offer(offer)
        })?;
        load_header_map(self.kv.as_ref(), &self.stores, |round, hash| {
            self.header_map.install_loaded(round, hash)
        })?;

        // Phase ordering guarantees the account store is never behind
        // the others.
        if book_round > acct_round || header_round > acct_round {
            return Err(EngineError::CorruptState(
                "orderbook or header store ahead of account store".into(),
            ));
        }

        chain.applied_round = acct_round;
        chain.committed_round = acct_round;
        chain.prev_hash = self
            .header_map
            .get(acct_round)
            .unwrap_or([0u8; 32]);
        chain.recent_blocks.clear();

        for block in decided_blocks {
            let round = block.hashed.header.round;
            if round <= book_round {
                // Fully persisted everywhere; only the continuity check
                // matters.
                if self.header_map.get(round) != Some(block.hashed.header_hash) {
                    return Err(EngineError::CorruptState(format!(
                        "decided block {round} disagrees with persisted header map"
                    )));
                }
                continue;
            }
            if round > target_round {
                break;
            }
            if round <= acct_round {
                // Accounts have this round; rebuild the lagging stores.
                self.trusted_replay_books_only(block)?;
                if round > header_round {
                    self.header_map
                        .insert_for_production(round, block.hashed.header_hash);
                }
                chain
                    .pending_book_thunks
                    .extend(self.manager.commit_round(round));
                chain.prev_hash = block.hashed.header_hash;
                chain.last_prices = block.hashed.header.prices.clone();
                chain.recent_blocks.push(block.clone());
            } else {
                // Above the overlap window: full untrusted replay.
                if !self.exec_block_locked(chain, block, self.config.check_sigs()) {
                    return Err(EngineError::CorruptState(format!(
                        "decided block {round} failed untrusted replay"
                    )));
                }
                chain.committed_round = round;
            }
        }

        chain.applied_round = target_round.max(chain.applied_round);
        chain.committed_round = chain.applied_round;
        if let Some(last) = decided_blocks.last() {
            chain.prev_hash = last.hashed.header_hash;
            chain.last_prices = last.hashed.header.prices.clone();
        }
        info!("replay complete at round {}", chain.committed_round);
        Ok(())
    }

    /// Trusted replay of one block's orderbook effects only: the account
    /// store already contains this round, so balances (including clearing
    /// credits) must not be reapplied.
    fn trusted_replay_books_only(&self, block: &Block) -> Result<(), EngineError> {
        use crate::orderbook::Offer;
        use crate::wire::Operation;

        let header = &block.hashed.header;
        {
            let mut view = self.manager.view();
            for tx in &block.transactions {
                let meta = &tx.transaction.metadata;
                for (i, op) in tx.transaction.operations.iter().enumerate() {
                    match op {
                        Operation::CreateSellOffer(op)
                            if self.manager.validate_category(op.category) =>
                        {
                            let idx = self.manager.look_up_idx(op.category);
                            view.add_offer(
                                idx,
                                Offer {
                                    category: op.category,
                                    owner: meta.source_account,
                                    offer_id: meta.sequence_number + i as u64,
                                    amount: op.amount,
                                    min_price: op.min_price,
                                },
                            );
                        }
                        Operation::CancelSellOffer(op)
                            if self.manager.validate_category(op.category) =>
                        {
                            let idx = self.manager.look_up_idx(op.category);
                            let _ =
                                view.delete_offer(idx, op.min_price, meta.source_account, op.offer_id);
                        }
                        _ => {}
                    }
                }
            }
        }
        self.manager.finish_merges();

        let targets: Vec<u64> = header
            .clearing_details
            .iter()
            .map(|d| d.sold_amount)
            .collect();
        if !self
            .manager
            .clear_offers_books_only(&header.prices, &targets)
        {
            return Err(EngineError::CorruptState(format!(
                "trusted replay of round {} could not clear recorded volumes",
                header.round
            )));
        }
        let hashes = self.manager.hash_all();
        for (hash, detail) in hashes.iter().zip(header.clearing_details.iter()) {
            if hash != &detail.root_hash {
                return Err(EngineError::CorruptState(format!(
                    "trusted replay of round {} produced divergent book root",
                    header.round
                )));
            }
        }
        Ok(())
    }
}
