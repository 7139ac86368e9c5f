//! Database registry: the authoritative catalog of knowledge bases.
//!
//! The registry is a single YAML file mapping database names to their
//! [`DatabaseRecord`]. Location resolution, in priority order:
//!
//! 1. `$HYBRIDRAG_CONFIG`
//! 2. the `config_pointer` file under the state root
//! 3. `<state root>/registry.yaml`
//!
//! Every write goes through write-temp-then-rename so a crash can never
//! leave a truncated registry behind.

mod record;

pub use record::{
    validate_name, BackendSettings, DatabaseRecord, PostgresSettings, SizeThresholds, SourceType,
};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RagError, Result};
use crate::fsutil::{atomic_write, normalize_path};
use crate::state::StateRoot;

/// Environment variable pointing at an alternate registry file.
pub const REGISTRY_ENV: &str = "HYBRIDRAG_CONFIG";

const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    /// Records are kept as raw YAML values so one corrupt entry does not
    /// poison the rest of the file, and unknown entries survive rewrites.
    #[serde(default)]
    databases: BTreeMap<String, serde_yaml::Value>,
}

impl Default for RegistryFile {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            databases: BTreeMap::new(),
        }
    }
}

/// Partial update applied by [`DatabaseRegistry::update`]. Unset fields are
/// left untouched.
#[derive(Debug, Default, Clone)]
pub struct RecordPatch {
    pub rename: Option<String>,
    pub path: Option<PathBuf>,
    pub source_folder: Option<PathBuf>,
    pub source_type: Option<SourceType>,
    pub auto_watch: Option<bool>,
    pub watch_interval_sec: Option<u64>,
    pub recursive: Option<bool>,
    pub file_extensions: Option<std::collections::BTreeSet<String>>,
    pub model: Option<String>,
    pub backend: Option<BackendSettings>,
    pub thresholds: Option<SizeThresholds>,
    pub description: Option<String>,
}

/// Handle on the on-disk registry.
#[derive(Debug)]
pub struct DatabaseRegistry {
    state: StateRoot,
    registry_path: PathBuf,
    data: RegistryFile,
}

impl DatabaseRegistry {
    /// Open (or initialize) the registry for a state root, applying the
    /// location resolution order.
    pub fn open(state: &StateRoot) -> Result<Self> {
        let registry_path = Self::resolve_registry_path(state)?;
        let data = Self::load(&registry_path)?;
        Ok(Self {
            state: state.clone(),
            registry_path,
            data,
        })
    }

    /// Open a registry at an explicit file path, bypassing resolution.
    pub fn open_at(state: &StateRoot, registry_path: PathBuf) -> Result<Self> {
        let data = Self::load(&registry_path)?;
        Ok(Self {
            state: state.clone(),
            registry_path,
            data,
        })
    }

    fn resolve_registry_path(state: &StateRoot) -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var(REGISTRY_ENV) {
            if !env_path.is_empty() {
                return normalize_path(Path::new(&env_path));
            }
        }
        let pointer = state.config_pointer();
        if pointer.exists() {
            let contents = std::fs::read_to_string(&pointer)?;
            let contents = contents.trim();
            if !contents.is_empty() {
                return normalize_path(Path::new(contents));
            }
        }
        Ok(state.registry_file())
    }

    fn load(path: &Path) -> Result<RegistryFile> {
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            if text.trim().is_empty() {
                return Ok(RegistryFile::default());
            }
            Ok(serde_yaml::from_str(&text)?)
        } else {
            Ok(RegistryFile::default())
        }
    }

    fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.data)?;
        atomic_write(&self.registry_path, yaml.as_bytes())
    }

    /// Path of the registry file currently in use.
    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    fn decode(name: &str, value: &serde_yaml::Value) -> Option<DatabaseRecord> {
        match serde_yaml::from_value(value.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping unreadable registry entry '{name}': {e}");
                None
            }
        }
    }

    /// Register a new database. Fails if the name is invalid or taken.
    pub fn register(&mut self, mut record: DatabaseRecord) -> Result<DatabaseRecord> {
        record.name = record.name.to_lowercase();
        validate_name(&record.name)?;
        if self.data.databases.contains_key(&record.name) {
            return Err(RagError::AlreadyExists(record.name));
        }
        record.normalize()?;
        record.created_at = Utc::now();
        self.data
            .databases
            .insert(record.name.clone(), serde_yaml::to_value(&record)?);
        self.save()?;
        Ok(record)
    }

    /// Remove a database from the registry. Never touches the database
    /// directory itself. Returns false if the name was not registered.
    pub fn unregister(&mut self, name: &str) -> Result<bool> {
        let name = name.to_lowercase();
        if self.data.databases.remove(&name).is_some() {
            self.save()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn get(&self, name: &str) -> Option<DatabaseRecord> {
        let name = name.to_lowercase();
        self.data
            .databases
            .get(&name)
            .and_then(|v| Self::decode(&name, v))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.data.databases.contains_key(&name.to_lowercase())
    }

    /// All readable records. Corrupt entries are skipped with a warning.
    pub fn list(&self) -> Vec<DatabaseRecord> {
        self.data
            .databases
            .iter()
            .filter_map(|(name, value)| Self::decode(name, value))
            .collect()
    }

    /// Records with `auto_watch` enabled, for `watch start --all`.
    pub fn auto_watch_databases(&self) -> Vec<DatabaseRecord> {
        self.list().into_iter().filter(|r| r.auto_watch).collect()
    }

    /// Apply a partial update, handling rename collisions and path
    /// normalization.
    pub fn update(&mut self, name: &str, patch: RecordPatch) -> Result<DatabaseRecord> {
        let name = name.to_lowercase();
        let mut record = self
            .get(&name)
            .ok_or_else(|| RagError::NotFound(name.clone()))?;

        if let Some(new_name) = patch.rename {
            let new_name = new_name.to_lowercase();
            validate_name(&new_name)?;
            if new_name != name && self.data.databases.contains_key(&new_name) {
                return Err(RagError::AlreadyExists(new_name));
            }
            record.name = new_name;
        }
        if let Some(path) = patch.path {
            record.path = path;
        }
        if let Some(folder) = patch.source_folder {
            record.source_folder = Some(folder);
        }
        if let Some(source_type) = patch.source_type {
            record.source_type = source_type;
        }
        if let Some(auto_watch) = patch.auto_watch {
            record.auto_watch = auto_watch;
        }
        if let Some(interval) = patch.watch_interval_sec {
            record.watch_interval_sec = interval;
        }
        if let Some(recursive) = patch.recursive {
            record.recursive = recursive;
        }
        if let Some(extensions) = patch.file_extensions {
            record.file_extensions = Some(extensions);
        }
        if let Some(model) = patch.model {
            record.model = Some(model);
        }
        if let Some(backend) = patch.backend {
            record.backend = backend;
        }
        if let Some(thresholds) = patch.thresholds {
            record.thresholds = thresholds;
        }
        if let Some(description) = patch.description {
            record.description = Some(description);
        }
        record.normalize()?;

        if record.name != name {
            self.data.databases.remove(&name);
        }
        self.data
            .databases
            .insert(record.name.clone(), serde_yaml::to_value(&record)?);
        self.save()?;
        Ok(record)
    }

    /// Stamp `last_sync_at` with the current time.
    pub fn update_last_sync(&mut self, name: &str) -> Result<()> {
        let name = name.to_lowercase();
        let mut record = self
            .get(&name)
            .ok_or_else(|| RagError::NotFound(name.clone()))?;
        record.last_sync_at = Some(Utc::now());
        self.data
            .databases
            .insert(name, serde_yaml::to_value(&record)?);
        self.save()
    }

    /// Resolve a database name or raw path. Inputs without path separators
    /// are looked up as names; anything else is normalized and returned
    /// with no record.
    pub fn resolve(&self, name_or_path: &str) -> Result<(PathBuf, Option<DatabaseRecord>)> {
        if !name_or_path.contains('/') && !name_or_path.contains('\\') {
            if let Some(record) = self.get(name_or_path) {
                let path = record.path.clone();
                return Ok((path, Some(record)));
            }
        }
        Ok((normalize_path(Path::new(name_or_path))?, None))
    }

    /// Point subsequent opens at an alternate registry file.
    pub fn set_config_pointer(&self, target: &Path) -> Result<()> {
        let normalized = normalize_path(target)?;
        atomic_write(
            &self.state.config_pointer(),
            normalized.to_string_lossy().as_bytes(),
        )
    }

    /// Remove the pointer, reverting to the default location.
    pub fn clear_config_pointer(&self) -> Result<()> {
        let pointer = self.state.config_pointer();
        if pointer.exists() {
            std::fs::remove_file(pointer)?;
        }
        Ok(())
    }
}
