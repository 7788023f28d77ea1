//! Engine configuration.

use bitflags::bitflags;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

bitflags! {
    /// Boolean engine options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EngineFlags: u32 {
        /// Verify transaction signatures during processing.
        const CHECK_SIGS = 1 << 0;
        /// Keep detailed per-account modification records (not just
        /// touched markers).
        const DETAILED_MOD_LOG = 1 << 1;
        /// Write per-transfer diagnostic records each round.
        const TRANSFER_DIAGNOSTICS = 1 << 2;
        /// Write per-round state-hash records.
        const HASH_DIAGNOSTICS = 1 << 3;
    }
}

/// Configuration rejected at construction.
#[derive(Debug, Error)]
#[error("invalid engine config: {0}")]
pub struct ConfigError(pub &'static str);

/// Static engine parameters, fixed at genesis.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size of the asset universe (at most 256).
    pub num_assets: u16,
    /// Commission exponent: the protocol keeps `2^-tax_rate` of every
    /// clearing payout, which also bounds acceptable clearing slack.
    pub tax_rate: u8,
    /// Initial tâtonnement step shift.
    pub smooth_mult: u8,
    /// Target transactions per block; blocks may be smaller.
    pub block_size: u32,
    /// Rounds between persistence flushes.
    pub persistence_frequency: u64,
    /// Account database shard count (power of two).
    pub num_account_db_shards: u32,
    /// Sequence-number reservations allowed per account per block.
    pub max_seqs_per_block: u64,
    /// Mempool chunk sizing.
    pub mempool_target_chunk_size: usize,
    /// Mempool capacity.
    pub max_mempool_size: usize,
    /// Wall-clock budget for the price search.
    pub price_search_budget: Duration,
    /// Boolean options.
    pub flags: EngineFlags,
    /// Where diagnostic logs land when enabled.
    pub diagnostics_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            num_assets: 2,
            tax_rate: 10,
            smooth_mult: 4,
            block_size: 100_000,
            persistence_frequency: 1,
            num_account_db_shards: 16,
            max_seqs_per_block: 64,
            mempool_target_chunk_size: 1_000,
            max_mempool_size: 2_000_000,
            price_search_budget: Duration::from_millis(500),
            flags: EngineFlags::CHECK_SIGS,
            diagnostics_dir: None,
        }
    }
}

impl EngineConfig {
    /// Validate parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_assets < 2 || self.num_assets > 256 {
            return Err(ConfigError("num_assets must be in 2..=256"));
        }
        if self.tax_rate == 0 || self.tax_rate >= 16 {
            return Err(ConfigError("tax_rate must be in 1..=15"));
        }
        if !self.num_account_db_shards.is_power_of_two() {
            return Err(ConfigError("shard count must be a power of two"));
        }
        if self.max_seqs_per_block == 0 {
            return Err(ConfigError("max_seqs_per_block must be positive"));
        }
        if self.block_size == 0 {
            return Err(ConfigError("block_size must be positive"));
        }
        if self.persistence_frequency == 0 {
            return Err(ConfigError("persistence_frequency must be positive"));
        }
        if self.mempool_target_chunk_size == 0 {
            return Err(ConfigError("mempool chunk size must be positive"));
        }
        Ok(())
    }

    /// Whether signature checking is on.
    pub fn check_sigs(&self) -> bool {
        self.flags.contains(EngineFlags::CHECK_SIGS)
    }
}
