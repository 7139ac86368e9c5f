use std::sync::Arc;

use anyhow::Result;
use hybridrag_core::engine::{HttpEngineConfig, HttpRagEngine, RagEngine};
use hybridrag_core::error::RagError;
use hybridrag_core::ingest::EngineFactory;
use hybridrag_core::lock::LockManager;
use hybridrag_core::monitor::AlertCenter;
use hybridrag_core::registry::DatabaseRegistry;
use hybridrag_core::state::StateRoot;

/// Shared handles for every subcommand: the state root and the pieces
/// hanging off it. Built once at startup so tests can redirect everything
/// with `HYBRIDRAG_HOME`.
#[derive(Debug, Clone)]
pub struct Context {
    state: StateRoot,
}

impl Context {
    pub fn resolve() -> Result<Self> {
        Ok(Self {
            state: StateRoot::resolve()?,
        })
    }

    pub fn state(&self) -> &StateRoot {
        &self.state
    }

    pub fn registry(&self) -> Result<DatabaseRegistry> {
        Ok(DatabaseRegistry::open(&self.state)?)
    }

    pub fn locks(&self) -> LockManager {
        LockManager::new(self.state.clone())
    }

    pub fn alerts(&self) -> Arc<AlertCenter> {
        Arc::new(AlertCenter::new(self.state.alerts_file()))
    }

    /// Engine factory wired to the HTTP sidecar adapter.
    pub fn engine_factory(&self) -> EngineFactory {
        Arc::new(|record| {
            let config = HttpEngineConfig::for_database(record);
            let engine = HttpRagEngine::new(config).map_err(RagError::Engine)?;
            Ok(Arc::new(engine) as Arc<dyn RagEngine>)
        })
    }

    /// Look up a database record or fail with a user error.
    pub fn require_record(
        &self,
        name: &str,
    ) -> Result<hybridrag_core::registry::DatabaseRecord> {
        let registry = self.registry()?;
        registry
            .get(name)
            .ok_or_else(|| RagError::NotFound(name.to_string()).into())
    }
}
