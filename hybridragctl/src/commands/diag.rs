//! Diagnostics: `status`, `check-db`, `list-dbs`, `db-info`.

use anyhow::Result;
use hybridrag_core::engine::DocStatusFile;
use hybridrag_core::error::RagError;
use hybridrag_core::metadata::DatabaseMetadata;
use hybridrag_core::registry::BackendSettings;

use crate::context::Context;

pub fn status(context: &Context) -> Result<()> {
    let registry = context.registry()?;
    let records = registry.list();
    let locks = context.locks();

    println!("Registry: {}", registry.registry_path().display());
    println!("State root: {}", context.state().root().display());
    println!("Databases: {}", records.len());

    let mut running = 0;
    for record in &records {
        if locks.is_running(&record.name).0 {
            running += 1;
        }
    }
    println!("Watchers running: {running}");

    let summary = context.alerts().store().summary();
    println!(
        "Alerts (unacked): {} total ({} critical, {} error, {} warning)",
        summary.total, summary.critical, summary.error, summary.warning
    );
    Ok(())
}

pub fn list_dbs(context: &Context) -> Result<()> {
    let registry = context.registry()?;
    for record in registry.list() {
        println!("{}", record.name);
    }
    Ok(())
}

pub fn check_db(context: &Context, name: &str) -> Result<()> {
    let record = context.require_record(name)?;
    let mut healthy = true;

    println!("Checking '{name}'");

    if record.path.is_dir() {
        println!("  [ok] database path exists: {}", record.path.display());
    } else {
        healthy = false;
        println!("  [!!] database path missing: {}", record.path.display());
    }

    match &record.source_folder {
        Some(folder) if folder.is_dir() => {
            println!("  [ok] source folder exists: {}", folder.display());
        }
        Some(folder) => {
            healthy = false;
            println!("  [!!] source folder missing: {}", folder.display());
        }
        None => println!("  [--] no source folder configured"),
    }

    if record.backend.is_json() {
        let store = DocStatusFile::new(&record.path);
        match store.document_count() {
            Ok(count) => println!("  [ok] doc-status store readable: {count} documents"),
            Err(e) => {
                healthy = false;
                println!("  [!!] doc-status store unreadable: {e}");
            }
        }
    }

    let (running, pid) = context.locks().is_running(name);
    if running {
        println!("  [ok] watcher running (pid {})", pid.unwrap_or_default());
    } else {
        println!("  [--] watcher not running");
    }

    if healthy {
        println!("'{name}' looks healthy");
        Ok(())
    } else {
        Err(RagError::Internal(format!("database '{name}' has problems")).into())
    }
}

pub fn db_info(context: &Context, name: &str) -> Result<()> {
    let record = context.require_record(name)?;
    println!("Name        : {}", record.name);
    println!("Path        : {}", record.path.display());
    println!(
        "Source      : {}",
        record
            .source_folder
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Type        : {}", record.source_type);
    println!(
        "Backend     : {}",
        match record.backend {
            BackendSettings::Json => "json".to_string(),
            BackendSettings::Postgres(ref pg) => format!("postgres ({}:{})", pg.host, pg.port),
        }
    );
    println!("Interval    : {}s", record.watch_interval_sec);
    println!("Auto watch  : {}", record.auto_watch);
    println!("Created     : {}", record.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!(
        "Last sync   : {}",
        record
            .last_sync_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    if let Some(description) = &record.description {
        println!("Description : {description}");
    }

    if let Ok(meta) = DatabaseMetadata::open(&record.path) {
        println!("Total files ingested: {}", meta.total_files_ingested());
        let history = meta.history(5);
        if !history.is_empty() {
            println!("Recent ingestion history:");
            for entry in history {
                println!(
                    "  {} {:>5} files {} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.files_processed,
                    if entry.success { "ok " } else { "FAIL" },
                    entry.notes
                );
            }
        }
    }
    Ok(())
}
