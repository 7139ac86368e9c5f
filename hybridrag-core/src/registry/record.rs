use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::fsutil::normalize_path;

/// Database names: lowercase alphanumeric plus hyphens, starting and ending
/// with an alphanumeric character.
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("valid name regex"));

/// Validate a (already lower-cased) database name against the naming rules.
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(RagError::InvalidName(format!(
            "'{name}' must be lowercase alphanumeric with hyphens, starting and ending with an alphanumeric character"
        )))
    }
}

/// Kind of data source feeding a database. Determines default filters and
/// preprocessing applied before insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Filesystem,
    Specstory,
    Api,
    Schema,
}

impl SourceType {
    /// Default file extensions watched for this source type when the record
    /// does not configure any.
    pub fn default_extensions(&self) -> BTreeSet<String> {
        match self {
            SourceType::Filesystem | SourceType::Specstory => BTreeSet::from([".md".to_string()]),
            SourceType::Api | SourceType::Schema => BTreeSet::from([".json".to_string()]),
        }
    }

    /// SpecStory sources only watch files under a `.specstory` directory.
    pub fn specstory_only(&self) -> bool {
        matches!(self, SourceType::Specstory)
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceType::Filesystem => "filesystem",
            SourceType::Specstory => "specstory",
            SourceType::Api => "api",
            SourceType::Schema => "schema",
        };
        f.write_str(s)
    }
}

/// PostgreSQL connection settings handed to the engine. The password is
/// never serialized; it is read from `$HYBRIDRAG_PG_PASSWORD` at use time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostgresSettings {
    #[serde(default = "default_pg_host")]
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    #[serde(default = "default_pg_user")]
    pub user: String,
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    #[serde(default = "default_pg_database")]
    pub database: String,
    #[serde(default = "default_pg_workspace")]
    pub workspace: String,
    #[serde(default = "default_pg_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_pg_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_vector_index")]
    pub vector_index: String,
    #[serde(default)]
    pub index_params: BTreeMap<String, serde_yaml::Value>,
}

fn default_pg_host() -> String {
    "localhost".into()
}
fn default_pg_port() -> u16 {
    5432
}
fn default_pg_user() -> String {
    "hybridrag".into()
}
fn default_pg_database() -> String {
    "hybridrag".into()
}
fn default_pg_workspace() -> String {
    "default".into()
}
fn default_pg_ssl_mode() -> String {
    "prefer".into()
}
fn default_pg_max_connections() -> u32 {
    10
}
fn default_vector_index() -> String {
    "hnsw".into()
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            host: default_pg_host(),
            port: default_pg_port(),
            user: default_pg_user(),
            password: None,
            database: default_pg_database(),
            workspace: default_pg_workspace(),
            ssl_mode: default_pg_ssl_mode(),
            max_connections: default_pg_max_connections(),
            vector_index: default_vector_index(),
            index_params: BTreeMap::new(),
        }
    }
}

/// Storage backend selection, surfaced to the engine at initialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendSettings {
    #[default]
    Json,
    Postgres(PostgresSettings),
}

impl BackendSettings {
    pub fn is_json(&self) -> bool {
        matches!(self, BackendSettings::Json)
    }
}

/// Monitoring thresholds, per database.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SizeThresholds {
    /// Warn when any JSON storage file reaches this many MiB.
    #[serde(default = "default_file_warn_mb")]
    pub file_warn_mb: u64,
    /// Warn when total JSON storage reaches this many MiB.
    #[serde(default = "default_total_warn_mb")]
    pub total_warn_mb: u64,
    /// Warn when the ingestion rate drops by this percentage from baseline.
    #[serde(default = "default_perf_degradation_pct")]
    pub perf_degradation_pct: u32,
}

fn default_file_warn_mb() -> u64 {
    500
}
fn default_total_warn_mb() -> u64 {
    2048
}
fn default_perf_degradation_pct() -> u32 {
    50
}

impl Default for SizeThresholds {
    fn default() -> Self {
        Self {
            file_warn_mb: default_file_warn_mb(),
            total_warn_mb: default_total_warn_mb(),
            perf_degradation_pct: default_perf_degradation_pct(),
        }
    }
}

fn default_watch_interval() -> u64 {
    300
}

fn default_recursive() -> bool {
    true
}

/// One registered database: its engine state directory, source folder, and
/// ingestion configuration. Persisted in the registry file keyed by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseRecord {
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_folder: Option<PathBuf>,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub auto_watch: bool,
    #[serde(default = "default_watch_interval")]
    pub watch_interval_sec: u64,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_extensions: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub thresholds: SizeThresholds,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Type-specific settings, carried opaquely for the source-type
    /// preprocessors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specstory: Option<BTreeMap<String, serde_yaml::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<BTreeMap<String, serde_yaml::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<BTreeMap<String, serde_yaml::Value>>,
}

impl DatabaseRecord {
    /// Build a record with defaults, validating the name and normalizing
    /// paths to absolute. `created_at` is stamped here.
    pub fn new(name: &str, path: PathBuf) -> Result<Self> {
        let name = name.to_lowercase();
        validate_name(&name)?;
        Ok(Self {
            name,
            path: normalize_path(&path)?,
            source_folder: None,
            source_type: SourceType::default(),
            auto_watch: false,
            watch_interval_sec: default_watch_interval(),
            recursive: default_recursive(),
            file_extensions: None,
            model: None,
            backend: BackendSettings::default(),
            thresholds: SizeThresholds::default(),
            created_at: Utc::now(),
            last_sync_at: None,
            description: None,
            specstory: None,
            api: None,
            schema: None,
        })
    }

    pub fn with_source_folder(mut self, folder: PathBuf) -> Result<Self> {
        self.source_folder = Some(normalize_path(&folder)?);
        Ok(self)
    }

    /// Extensions to watch: configured set, or the source-type default.
    pub fn effective_extensions(&self) -> BTreeSet<String> {
        self.file_extensions
            .clone()
            .unwrap_or_else(|| self.source_type.default_extensions())
    }

    /// Re-normalize both paths; called whenever a record is written.
    pub(crate) fn normalize(&mut self) -> Result<()> {
        self.path = normalize_path(&self.path)?;
        if let Some(folder) = &self.source_folder {
            self.source_folder = Some(normalize_path(folder)?);
        }
        Ok(())
    }
}
