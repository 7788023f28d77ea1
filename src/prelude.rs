//! Convenient single import for embedding the engine.
//!
//! ```
//! use speedex_engine::prelude::*;
//! ```

pub use crate::accounts::{AccountDatabase, RevertableAsset, SequenceTracker, UserAccount};
pub use crate::crypto::{check_tx_signature, hash_xdr, KeyPair, ShardRouter};
pub use crate::engine::{
    EngineConfig, EngineError, EngineFlags, HeaderHashMap, ReplayLoader, SpeedexEngine,
};
pub use crate::mempool::Mempool;
pub use crate::modlog::ModificationLog;
pub use crate::orderbook::{Offer, Orderbook, OrderbookManager};
pub use crate::persistence::{FileKvStore, KvStore, MemKvStore, StorageError};
pub use crate::prices::{LpSolver, MarketSnapshot, TatonnementConfig, TatonnementOracle};
pub use crate::processing::{BlockStateUpdateStats, TxStatus};
pub use crate::trie::{Trie, TrieValue};
pub use crate::wire::{
    AccountCommitment, AccountId, AssetId, Block, BookClearing, Hash, HashedBlock, Header,
    OfferCategory, Operation, PaymentOp, Price, Round, SignedTransaction, Transaction, TxMetadata,
};
