//! The asynchronous persistence pipeline.
//!
//! Phase 0 runs synchronously at commit: thunks are snapshotted and the
//! job enters the pipeline. Three chained background workers then apply
//! account thunks (phase 1), fsync (phase 2), and persist orderbooks
//! plus the header-hash map (phase 3). Phase K of round R runs
//! concurrently with phase K-1 of round R+1; within a round the phases
//! are strictly ordered, and each phase processes rounds in order.

use super::kvstore::{persisted_round, persisted_round_entry, DbHandle, KvStore, StorageResult};
use crate::accounts::AccountPersistenceThunk;
use crate::orderbook::{Offer, OrderbookThunk};
use crate::utils::AsyncWorker;
use crate::wire::{Hash, Round, Xdr};
use std::sync::Arc;
use tracing::{debug, error};

/// Key under which the account-shard routing key persists (shard 0).
pub const HASH_KEY_RECORD: &[u8] = b"hash key";

/// Handles to every database the engine owns inside the store.
#[derive(Clone)]
pub struct StoreSet {
    /// One database per account shard.
    pub account_shards: Vec<DbHandle>,
    /// All orderbooks share one database, keyed by pair index + offer key.
    pub orderbooks: DbHandle,
    /// Round -> header hash.
    pub header_map: DbHandle,
}

impl StoreSet {
    /// Open (creating as needed) the engine's databases.
    pub fn open(kv: &dyn KvStore, num_shards: u32) -> StorageResult<Self> {
        let mut account_shards = Vec::with_capacity(num_shards as usize);
        for shard in 0..num_shards {
            account_shards.push(kv.open_db(&format!("accounts_{shard}"))?);
        }
        Ok(StoreSet {
            account_shards,
            orderbooks: kv.open_db("orderbooks")?,
            header_map: kv.open_db("header_hash_map")?,
        })
    }

    /// Lowest persisted round across the account shards.
    pub fn account_persisted_round(&self, kv: &dyn KvStore) -> StorageResult<Round> {
        let mut min = u64::MAX;
        for db in &self.account_shards {
            min = min.min(persisted_round(kv, *db)?);
        }
        Ok(if min == u64::MAX { 0 } else { min })
    }

    /// Persisted round of the orderbook database.
    pub fn orderbook_persisted_round(&self, kv: &dyn KvStore) -> StorageResult<Round> {
        persisted_round(kv, self.orderbooks)
    }

    /// Persisted round of the header-map database.
    pub fn header_persisted_round(&self, kv: &dyn KvStore) -> StorageResult<Round> {
        persisted_round(kv, self.header_map)
    }
}

/// Serialize an orderbook store key.
pub fn orderbook_store_key(pair_index: usize, offer_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + offer_key.len());
    key.extend_from_slice(&(pair_index as u32).to_be_bytes());
    key.extend_from_slice(offer_key);
    key
}

/// One round's worth of deferred writes, handed to phase 1.
pub struct PersistJob {
    /// Round being persisted (every write belongs to a round `<= this`).
    pub round: Round,
    /// Account commitment puts, pre-grouped per shard.
    pub account_puts: Vec<Vec<(Vec<u8>, Vec<u8>)>>,
    /// Orderbook deltas.
    pub book_thunks: Vec<OrderbookThunk>,
    /// Header-map inserts.
    pub header_entries: Vec<(Round, Hash)>,
}

impl PersistJob {
    /// Group account thunks into per-shard put lists.
    pub fn from_thunks(
        round: Round,
        thunks: Vec<AccountPersistenceThunk>,
        shard_of: impl Fn(u64) -> usize,
        num_shards: usize,
        book_thunks: Vec<OrderbookThunk>,
        header_entries: Vec<(Round, Hash)>,
    ) -> Self {
        let mut account_puts: Vec<Vec<(Vec<u8>, Vec<u8>)>> = vec![Vec::new(); num_shards];
        for thunk in thunks {
            for (id, bytes) in thunk.entries {
                account_puts[shard_of(id)].push((id.to_be_bytes().to_vec(), bytes));
            }
        }
        PersistJob {
            round,
            account_puts,
            book_thunks,
            header_entries,
        }
    }
}

/// The chained background workers. Field order matters: dropping
/// phase 1 first drains its queue into phase 2, and so on down the
/// chain.
pub struct PersistencePipeline {
    phase1: Arc<AsyncWorker<PersistJob>>,
    phase2: Arc<AsyncWorker<Phase3Job>>,
    phase3: Arc<AsyncWorker<Phase3Job>>,
}

struct Phase3Job {
    round: Round,
    book_thunks: Vec<OrderbookThunk>,
    header_entries: Vec<(Round, Hash)>,
}

impl PersistencePipeline {
    /// Spawn the three phase workers over a shared store.
    pub fn new(kv: Arc<dyn KvStore>, stores: StoreSet) -> Self {
        let phase3 = {
            let kv = Arc::clone(&kv);
            let stores = stores.clone();
            Arc::new(AsyncWorker::spawn("persist-phase3", move |job: Phase3Job| {
                if let Err(e) = run_phase3(kv.as_ref(), &stores, &job) {
                    error!("phase 3 persistence failed at round {}: {e}", job.round);
                }
            }))
        };

        let phase2 = {
            let kv = Arc::clone(&kv);
            let phase3 = Arc::clone(&phase3);
            Arc::new(AsyncWorker::spawn("persist-phase2", move |job: Phase3Job| {
                if let Err(e) = kv.sync() {
                    error!("phase 2 fsync failed at round {}: {e}", job.round);
                }
                phase3.submit(job);
            }))
        };

        let phase1 = {
            let kv = Arc::clone(&kv);
            let stores = stores.clone();
            let phase2 = Arc::clone(&phase2);
            Arc::new(AsyncWorker::spawn("persist-phase1", move |job: PersistJob| {
                if let Err(e) = run_phase1(kv.as_ref(), &stores, &job) {
                    error!("phase 1 persistence failed at round {}: {e}", job.round);
                }
                phase2.submit(Phase3Job {
                    round: job.round,
                    book_thunks: job.book_thunks,
                    header_entries: job.header_entries,
                });
            }))
        };

        PersistencePipeline {
            phase1,
            phase2,
            phase3,
        }
    }

    /// Enter a round's writes into the pipeline (end of phase 0).
    pub fn submit(&self, job: PersistJob) {
        debug!("persistence job submitted for round {}", job.round);
        self.phase1.submit(job);
    }

    /// Block until every submitted round has fully persisted.
    ///
    /// Waiting down the chain is sound: an idle phase has already handed
    /// its jobs to the next worker's queue before reporting idle.
    pub fn wait_for_async_persist(&self) {
        self.phase1.wait_idle();
        self.phase2.wait_idle();
        self.phase3.wait_idle();
    }
}

fn run_phase1(kv: &dyn KvStore, stores: &StoreSet, job: &PersistJob) -> StorageResult<()> {
    debug_assert_eq!(job.account_puts.len(), stores.account_shards.len());
    for (shard, puts) in job.account_puts.iter().enumerate() {
        let mut batch = puts.clone();
        batch.push(persisted_round_entry(job.round));
        kv.write(stores.account_shards[shard], &batch, &[])?;
    }
    debug!("phase 1 complete for round {}", job.round);
    Ok(())
}

fn run_phase3(kv: &dyn KvStore, stores: &StoreSet, job: &Phase3Job) -> StorageResult<()> {
    let mut puts: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let mut deletes: Vec<Vec<u8>> = Vec::new();
    for thunk in &job.book_thunks {
        for (key, bytes) in &thunk.puts {
            puts.push((orderbook_store_key(thunk.pair_index, key), bytes.clone()));
        }
        for key in &thunk.deletes {
            deletes.push(orderbook_store_key(thunk.pair_index, key));
        }
    }
    puts.push(persisted_round_entry(job.round));
    kv.write(stores.orderbooks, &puts, &deletes)?;

    let mut header_puts: Vec<(Vec<u8>, Vec<u8>)> = job
        .header_entries
        .iter()
        .map(|(round, hash)| (round.to_be_bytes().to_vec(), hash.to_vec()))
        .collect();
    header_puts.push(persisted_round_entry(job.round));
    kv.write(stores.header_map, &header_puts, &[])?;
    kv.sync()?;
    debug!("phase 3 complete for round {}", job.round);
    Ok(())
}

/// Load every persisted offer back into memory.
pub fn load_orderbooks<F: FnMut(Offer)>(
    kv: &dyn KvStore,
    stores: &StoreSet,
    mut install: F,
) -> StorageResult<()> {
    kv.for_each(stores.orderbooks, &mut |key, value| {
        if key.len() != 4 + crate::orderbook::OFFER_KEY_LEN {
            // watermark record
            return;
        }
        if let Ok(offer) = Offer::from_xdr_bytes(value) {
            install(offer);
        }
    })
}

/// Load every persisted header-map entry.
pub fn load_header_map<F: FnMut(Round, Hash)>(
    kv: &dyn KvStore,
    stores: &StoreSet,
    mut install: F,
) -> StorageResult<()> {
    kv.for_each(stores.header_map, &mut |key, value| {
        let (Ok(round), Ok(hash)) = (
            <[u8; 8]>::try_from(key).map(u64::from_be_bytes),
            <[u8; 32]>::try_from(value),
        ) else {
            return;
        };
        install(round, hash);
    })
}

/// Load every persisted account commitment.
pub fn load_accounts<F: FnMut(crate::wire::AccountCommitment)>(
    kv: &dyn KvStore,
    stores: &StoreSet,
    mut install: F,
) -> StorageResult<()> {
    for db in &stores.account_shards {
        kv.for_each(*db, &mut |key, value| {
            if key.len() != 8 {
                return;
            }
            if let Ok(commitment) = crate::wire::AccountCommitment::from_xdr_bytes(value) {
                install(commitment);
            }
        })?;
    }
    Ok(())
}
