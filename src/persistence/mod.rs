//! Durable storage: the KVStore capability the engine consumes and the
//! four-phase asynchronous flush pipeline built over it.

pub mod kvstore;
pub mod pipeline;

pub use kvstore::{
    persisted_round, persisted_round_entry, DbHandle, FileKvStore, KvStore, MemKvStore,
    StorageError, StorageResult, PERSISTED_ROUND_KEY,
};
pub use pipeline::{
    load_accounts, load_header_map, load_orderbooks, orderbook_store_key, PersistJob,
    PersistencePipeline, StoreSet, HASH_KEY_RECORD,
};
