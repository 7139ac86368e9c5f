//! Registry CRUD subcommands.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use hybridrag_core::error::RagError;
use hybridrag_core::registry::{
    BackendSettings, DatabaseRecord, PostgresSettings, RecordPatch, SourceType,
};

use crate::context::Context;

fn parse_source_type(value: &str) -> Result<SourceType> {
    match value {
        "filesystem" => Ok(SourceType::Filesystem),
        "specstory" => Ok(SourceType::Specstory),
        "api" => Ok(SourceType::Api),
        "schema" => Ok(SourceType::Schema),
        other => Err(RagError::Config(format!(
            "invalid source type '{other}' (expected filesystem, specstory, api, or schema)"
        ))
        .into()),
    }
}

fn parse_backend(value: &str) -> Result<BackendSettings> {
    match value {
        "json" => Ok(BackendSettings::Json),
        "postgres" => Ok(BackendSettings::Postgres(PostgresSettings::default())),
        other => Err(RagError::Config(format!(
            "invalid backend '{other}' (expected json or postgres)"
        ))
        .into()),
    }
}

fn extension_set(extensions: &[String]) -> BTreeSet<String> {
    extensions
        .iter()
        .map(|e| {
            let e = e.trim().to_lowercase();
            if e.starts_with('.') {
                e
            } else {
                format!(".{e}")
            }
        })
        .collect()
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Database name (lowercase alphanumeric and hyphens)
    pub name: String,
    /// Directory holding the engine state for this database
    #[arg(long)]
    pub path: PathBuf,
    /// Folder to watch for source files
    #[arg(long)]
    pub source_folder: Option<PathBuf>,
    /// filesystem, specstory, api, or schema
    #[arg(long, default_value = "filesystem")]
    pub source_type: String,
    /// Start this database with `watch start --all`
    #[arg(long)]
    pub auto_watch: bool,
    /// Seconds between change-detection ticks
    #[arg(long, default_value_t = 300)]
    pub watch_interval: u64,
    /// Model identifier passed to the engine
    #[arg(long)]
    pub model: Option<String>,
    /// Do not descend into subdirectories
    #[arg(long)]
    pub no_recursive: bool,
    /// File extensions to watch (comma separated, e.g. "md,txt")
    #[arg(long, value_delimiter = ',')]
    pub extensions: Vec<String>,
    /// Storage backend: json or postgres
    #[arg(long, default_value = "json")]
    pub backend: String,
    #[arg(long)]
    pub description: Option<String>,
}

pub fn register(context: &Context, args: RegisterArgs) -> Result<()> {
    let mut record = DatabaseRecord::new(&args.name, args.path)?;
    if let Some(folder) = args.source_folder {
        record = record.with_source_folder(folder)?;
    }
    record.source_type = parse_source_type(&args.source_type)?;
    record.auto_watch = args.auto_watch;
    record.watch_interval_sec = args.watch_interval;
    record.model = args.model;
    record.recursive = !args.no_recursive;
    if !args.extensions.is_empty() {
        record.file_extensions = Some(extension_set(&args.extensions));
    }
    record.backend = parse_backend(&args.backend)?;
    record.description = args.description;

    let mut registry = context.registry()?;
    let record = registry.register(record)?;
    println!("Registered '{}' at {}", record.name, record.path.display());
    if let Some(folder) = &record.source_folder {
        println!("  watching: {} (every {}s)", folder.display(), record.watch_interval_sec);
    }
    Ok(())
}

pub fn unregister(context: &Context, name: &str) -> Result<()> {
    let mut registry = context.registry()?;
    if registry.unregister(name)? {
        println!("Unregistered '{name}' (database files untouched)");
        Ok(())
    } else {
        Err(RagError::NotFound(name.to_string()).into())
    }
}

pub fn list(context: &Context) -> Result<()> {
    let registry = context.registry()?;
    let records = registry.list();
    if records.is_empty() {
        println!("No databases registered");
        return Ok(());
    }
    println!(
        "{:<20} {:<12} {:<10} {:<8} SOURCE",
        "NAME", "TYPE", "BACKEND", "WATCH"
    );
    for record in records {
        let backend = match record.backend {
            BackendSettings::Json => "json",
            BackendSettings::Postgres(_) => "postgres",
        };
        let watch = if record.auto_watch { "auto" } else { "manual" };
        let source = record
            .source_folder
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<12} {:<10} {:<8} {source}",
            record.name,
            record.source_type.to_string(),
            backend,
            watch
        );
    }
    Ok(())
}

pub fn show(context: &Context, name: &str) -> Result<()> {
    let record = context.require_record(name)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    pub name: String,
    /// New name for the database
    #[arg(long)]
    pub rename: Option<String>,
    #[arg(long)]
    pub path: Option<PathBuf>,
    #[arg(long)]
    pub source_folder: Option<PathBuf>,
    #[arg(long)]
    pub source_type: Option<String>,
    #[arg(long)]
    pub auto_watch: Option<bool>,
    #[arg(long)]
    pub watch_interval: Option<u64>,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub recursive: Option<bool>,
    #[arg(long, value_delimiter = ',')]
    pub extensions: Vec<String>,
    #[arg(long)]
    pub backend: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
}

pub fn update(context: &Context, args: UpdateArgs) -> Result<()> {
    let patch = RecordPatch {
        rename: args.rename,
        path: args.path,
        source_folder: args.source_folder,
        source_type: args.source_type.as_deref().map(parse_source_type).transpose()?,
        auto_watch: args.auto_watch,
        watch_interval_sec: args.watch_interval,
        recursive: args.recursive,
        file_extensions: if args.extensions.is_empty() {
            None
        } else {
            Some(extension_set(&args.extensions))
        },
        model: args.model,
        backend: args.backend.as_deref().map(parse_backend).transpose()?,
        thresholds: None,
        description: args.description,
    };

    let mut registry = context.registry()?;
    let record = registry.update(&args.name, patch)?;
    println!("Updated '{}'", record.name);
    Ok(())
}
