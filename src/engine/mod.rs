//! The engine surface: block assembly, chain continuity, scoped
//! rollback, and startup recovery.

pub mod assembler;
pub mod config;
pub mod hash_log;
pub mod header_map;
pub mod replay;
pub mod rollback;

pub use assembler::SpeedexEngine;
pub use config::{ConfigError, EngineConfig, EngineFlags};
pub use hash_log::HashLog;
pub use header_map::HeaderHashMap;
pub use replay::ReplayLoader;
pub use rollback::BlockApplyGuard;

use crate::persistence::StorageError;
use thiserror::Error;

/// Fatal engine faults. Per-transaction failures are not errors (see
/// [`crate::processing::TxStatus`]); anything here aborts the block and,
/// for corrupt persisted state, the process.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The KVStore failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration rejected at construction.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Persisted or replayed state contradicts itself.
    #[error("corrupt state: {0}")]
    CorruptState(String),
}
