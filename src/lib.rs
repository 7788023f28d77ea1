//! # Deterministic Parallel Batch Settlement Engine
//!
//! A batch settlement engine for a decentralized exchange, written for
//! deterministic parallel execution. A block of signed transactions is
//! processed concurrently against a sharded in-memory account database,
//! a single vector of market-clearing prices is computed for every asset
//! pair by tâtonnement (arbitrated by a feasibility solver), all sell
//! offers cross at those prices under a per-asset conservation
//! invariant, and a Merkle commitment over the entire state seals the
//! block. A symmetric validation path reconstructs and checks the same
//! commitments given only the header and transaction list.
//!
//! ## Key Properties
//!
//! - **Determinism under parallelism**: the header hash produced for a
//!   given transaction multiset is byte-identical whether the engine
//!   runs on one thread or many. Every parallel phase (transaction
//!   application, trie merging, hashing, clearing) is designed so its
//!   result is independent of scheduling.
//!
//! - **Lock-light concurrency**: balances are relaxed atomics with a
//!   CAS guard on debits; sequence numbers are bit-packed atomic
//!   windows; workers stage offers and modification records into
//!   thread-local tries that splice together afterwards. The only
//!   blocking synchronization is a reader-writer lock separating the
//!   parallel phase from commit/rollback, plus one mutex+condvar pair
//!   per background worker.
//!
//! - **Authenticated everything**: accounts, every orderbook, the
//!   modification log, and the round-to-header map are radix tries with
//!   cached subtree hashes; unchanged subtrees are never rehashed, and
//!   dirty ones hash in parallel.
//!
//! - **Revertability**: every structure supports commit/rollback at
//!   round granularity. A failed validation rolls the whole block back
//!   through scoped guards; a consensus rewind reloads from the durable
//!   store and replays decided blocks.
//!
//! ## Architecture
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`wire`] | Canonical XDR-style bytes, fixed-point prices, tx/block formats |
//! | [`crypto`] | Ed25519 signatures, structural hashing, keyed shard routing |
//! | [`trie`] | Authenticated radix trie: parallel merge, bulk deletion, parallel hashing |
//! | [`accounts`] | Revertable balances, sequence windows, the sharded account database |
//! | [`orderbook`] | Per-pair offer tries, staging, threshold clearing |
//! | [`modlog`] | Per-round dirty-account index driving commits and block bodies |
//! | [`processing`] | Serial evaluators over buffered/unbuffered views, parallel driver |
//! | [`prices`] | Tâtonnement search plus the feasibility solver |
//! | [`mempool`] | Chunked pending pool with background filtering |
//! | [`persistence`] | KVStore capability and the four-phase flush pipeline |
//! | [`engine`] | `propose` / `exec_block` / `commit_decision` / rewind / replay |
//!
//! ## Round Lifecycle
//!
//! Within a round the phases are strictly ordered: parallel transaction
//! application, new-offer merging, price search, clearing, commitment,
//! then persistence. Across rounds the persistence phases pipeline:
//! phase K of round R runs concurrently with phase K−1 of round R+1,
//! and a round is externally committed once its phase-0 snapshot is
//! taken.
//!
//! The consensus layer drives the engine through four calls:
//! [`engine::SpeedexEngine::propose`] builds a block from the mempool,
//! [`engine::SpeedexEngine::exec_block`] validates and applies a block
//! from elsewhere, [`engine::SpeedexEngine::commit_decision`] finalizes
//! a round, and [`engine::SpeedexEngine::rewind_to_last_commit`]
//! abandons speculative rounds.

pub mod accounts;
pub mod crypto;
pub mod engine;
pub mod mempool;
pub mod modlog;
pub mod orderbook;
pub mod persistence;
pub mod prelude;
pub mod prices;
pub mod processing;
pub mod trie;
mod utils;
pub mod wire;

pub use engine::{EngineConfig, EngineError, EngineFlags, ReplayLoader, SpeedexEngine};
pub use processing::TxStatus;
pub use utils::current_time_millis;
pub use wire::{Block, HashedBlock, Header, Price, SignedTransaction, Transaction};
