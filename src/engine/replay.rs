//! Startup recovery: rebuild an engine from the store plus the decided
//! block log.

use super::assembler::SpeedexEngine;
use super::config::EngineConfig;
use super::EngineError;
use crate::crypto::KeyPair;
use crate::persistence::KvStore;
use crate::wire::Block;
use std::sync::Arc;

/// Recovers engine state after a restart.
///
/// In-memory state is rebuilt from the persisted stores; blocks inside
/// the stores' overlap window are replayed in trusted mode to bring
/// every lagging store level, and decided blocks above the window go
/// through full untrusted validation. Loading is idempotent: running it
/// twice from the same store and log yields the same engine state.
pub struct ReplayLoader {
    /// Engine parameters (must match the chain being recovered).
    pub config: EngineConfig,
    /// The durable store being recovered from.
    pub kv: Arc<dyn KvStore>,
    /// This node's signing key.
    pub node_key: KeyPair,
}

impl ReplayLoader {
    /// Build the engine and bring it to the end of the decided log.
    pub fn load(self, decided_blocks: &[Block]) -> Result<SpeedexEngine, EngineError> {
        let engine = SpeedexEngine::new(self.config, self.kv, self.node_key)?;
        engine.replay_from_log(decided_blocks)?;
        Ok(engine)
    }
}
