use std::collections::HashMap;
use std::sync::Arc;

use hybridrag_core::engine::{HttpEngineConfig, HttpRagEngine, RagEngine};
use hybridrag_core::error::{RagError, Result};
use hybridrag_core::lock::LockManager;
use hybridrag_core::monitor::AlertCenter;
use hybridrag_core::registry::{DatabaseRecord, DatabaseRegistry};
use hybridrag_core::state::StateRoot;
use tokio::sync::Mutex;

/// Shared server state: the state root, a default database, and one cached
/// engine handle per database.
pub struct ServerState {
    state: StateRoot,
    default_database: Option<String>,
    alerts: AlertCenter,
    locks: LockManager,
    engines: Mutex<HashMap<String, Arc<dyn RagEngine>>>,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("state_root", &self.state.root())
            .field("default_database", &self.default_database)
            .finish()
    }
}

impl ServerState {
    pub fn resolve(default_database: Option<String>) -> Result<Self> {
        Ok(Self::at(StateRoot::resolve()?, default_database))
    }

    pub fn at(state: StateRoot, default_database: Option<String>) -> Self {
        Self {
            alerts: AlertCenter::new(state.alerts_file()),
            locks: LockManager::new(state.clone()),
            state,
            default_database,
            engines: Mutex::new(HashMap::new()),
        }
    }

    pub fn state_root(&self) -> &StateRoot {
        &self.state
    }

    pub fn alerts(&self) -> &AlertCenter {
        &self.alerts
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn registry(&self) -> Result<DatabaseRegistry> {
        DatabaseRegistry::open(&self.state)
    }

    /// Resolve the database a request addresses: explicit field first, then
    /// the server default.
    pub fn resolve_database(&self, requested: Option<&str>) -> Result<DatabaseRecord> {
        let name = requested
            .map(str::to_string)
            .or_else(|| self.default_database.clone())
            .ok_or_else(|| {
                RagError::Config("no database named in request and no default configured".into())
            })?;
        self.registry()?
            .get(&name)
            .ok_or(RagError::NotFound(name))
    }

    /// Cached engine handle for a database.
    pub async fn engine(&self, record: &DatabaseRecord) -> Result<Arc<dyn RagEngine>> {
        let mut engines = self.engines.lock().await;
        if let Some(engine) = engines.get(&record.name) {
            return Ok(engine.clone());
        }
        let config = HttpEngineConfig::for_database(record);
        let engine: Arc<dyn RagEngine> =
            Arc::new(HttpRagEngine::new(config).map_err(RagError::Engine)?);
        engines.insert(record.name.clone(), engine.clone());
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybridrag_core::registry::DatabaseRecord;

    fn state_with_db(default: Option<String>) -> (tempfile::TempDir, ServerState) {
        let dir = tempfile::tempdir().unwrap();
        let root = StateRoot::at(dir.path().to_path_buf());
        let mut registry =
            DatabaseRegistry::open_at(&root, root.registry_file()).unwrap();
        registry
            .register(DatabaseRecord::new("notes", dir.path().join("db")).unwrap())
            .unwrap();
        (dir, ServerState::at(root, default))
    }

    #[test]
    fn request_database_overrides_default() {
        let (_dir, state) = state_with_db(Some("notes".into()));
        assert_eq!(state.resolve_database(None).unwrap().name, "notes");
        assert_eq!(state.resolve_database(Some("notes")).unwrap().name, "notes");
    }

    #[test]
    fn missing_database_is_an_error() {
        let (_dir, state) = state_with_db(None);
        assert!(state.resolve_database(None).is_err());
        assert!(matches!(
            state.resolve_database(Some("ghost")),
            Err(RagError::NotFound(_))
        ));
    }
}
