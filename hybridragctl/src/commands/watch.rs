//! Watcher daemon lifecycle: run (foreground), start (detached), stop,
//! status.
//!
//! Only the daemon itself ever writes the PID file, and only while holding
//! the advisory lock; `watch start` just spawns the child and polls for it
//! to come up.

use std::time::Duration;

use anyhow::Result;
use clap::Subcommand;
use hybridrag_core::error::RagError;
use hybridrag_core::ingest::{queue_status, WatcherDaemon};
use hybridrag_core::logging::init_daemon_logging;
use hybridrag_core::registry::DatabaseRecord;
use tokio::sync::watch;
use tracing::info;

use crate::context::Context;

#[derive(Subcommand, Debug)]
pub enum WatchCommand {
    /// Run the watcher daemon in the foreground
    Run { name: String },
    /// Start a detached watcher daemon
    Start {
        name: Option<String>,
        /// Start every database with auto_watch enabled
        #[arg(long)]
        all: bool,
    },
    /// Stop a running watcher
    Stop {
        name: Option<String>,
        /// Stop every running watcher
        #[arg(long)]
        all: bool,
    },
    /// Report watcher status
    Status { name: Option<String> },
}

pub async fn run(context: &Context, command: WatchCommand) -> Result<()> {
    match command {
        WatchCommand::Run { name } => run_foreground(context, &name).await,
        WatchCommand::Start { name, all } => start(context, name.as_deref(), all),
        WatchCommand::Stop { name, all } => stop(context, name.as_deref(), all).await,
        WatchCommand::Status { name } => status(context, name.as_deref()),
    }
}

/// Wire SIGTERM and SIGINT into a shutdown flag.
pub fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::error!("Could not install SIGTERM handler: {e}");
                    return;
                }
            };
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        info!("Received SIGINT, shutting down");
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        let _ = tx.send(true);
    });
    rx
}

async fn run_foreground(context: &Context, name: &str) -> Result<()> {
    let record = context.require_record(name)?;

    let log_file = context.state().watcher_log_file(name);
    let _writer = init_daemon_logging(log_file)?;
    info!("Starting watcher for database: {name}");

    let locks = context.locks();
    let Some(guard) = locks.acquire(name, std::process::id())? else {
        let (_, pid) = locks.is_running(name);
        return Err(RagError::LockHeld {
            database: name.to_string(),
            pid,
        }
        .into());
    };

    let shutdown = shutdown_channel();
    let daemon = WatcherDaemon::new(
        record,
        context.state(),
        context.registry()?,
        context.alerts(),
        context.engine_factory(),
        guard,
        shutdown,
    )?;

    let stats = daemon.run().await?;
    println!(
        "Watcher stopped: {} ingested, {} duplicates skipped, {} errors",
        stats.ingested, stats.duplicates_skipped, stats.errors
    );
    Ok(())
}

fn start_one(context: &Context, record: &DatabaseRecord) -> Result<()> {
    let name = &record.name;
    let locks = context.locks();
    let (running, pid) = locks.is_running(name);
    if running {
        return Err(RagError::LockHeld {
            database: name.clone(),
            pid,
        }
        .into());
    }

    let log_file = context.state().watcher_log_file(name);
    if let Some(dir) = log_file.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)?;
    let log_err = log.try_clone()?;

    let exe = std::env::current_exe()?;
    let mut command = std::process::Command::new(exe);
    command
        .args(["watch", "run", name])
        .stdin(std::process::Stdio::null())
        .stdout(log)
        .stderr(log_err);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let child = command.spawn()?;
    println!("Started watcher for '{name}' (pid {})", child.id());
    println!("  log: {}", log_file.display());
    Ok(())
}

fn start(context: &Context, name: Option<&str>, all: bool) -> Result<()> {
    if all {
        let registry = context.registry()?;
        let records = registry.auto_watch_databases();
        if records.is_empty() {
            println!("No databases with auto_watch enabled");
            return Ok(());
        }
        for record in records {
            match start_one(context, &record) {
                Ok(()) => {}
                Err(e) => println!("  {}: {e}", record.name),
            }
        }
        Ok(())
    } else {
        let name = name.ok_or_else(|| RagError::Config("database name or --all required".into()))?;
        let record = context.require_record(name)?;
        start_one(context, &record)
    }
}

async fn stop_one(context: &Context, name: &str) -> Result<bool> {
    let locks = context.locks();
    let (running, pid) = locks.is_running(name);
    let Some(pid) = pid.filter(|_| running) else {
        println!("No watcher running for '{name}'");
        return Ok(false);
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
            .map_err(|e| RagError::Internal(format!("could not signal pid {pid}: {e}")))?;
    }

    // The daemon finishes its in-flight file before exiting.
    for _ in 0..100 {
        let (still_running, _) = locks.is_running(name);
        if !still_running {
            println!("Stopped watcher for '{name}' (was pid {pid})");
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!("Watcher for '{name}' (pid {pid}) has not exited yet; it will finish its current file");
    Ok(true)
}

async fn stop(context: &Context, name: Option<&str>, all: bool) -> Result<()> {
    if all {
        let registry = context.registry()?;
        for record in registry.list() {
            stop_one(context, &record.name).await?;
        }
        Ok(())
    } else {
        let name = name.ok_or_else(|| RagError::Config("database name or --all required".into()))?;
        stop_one(context, name).await?;
        Ok(())
    }
}

fn print_status(context: &Context, record: &DatabaseRecord) {
    let locks = context.locks();
    let (running, pid) = locks.is_running(&record.name);
    let mode = if running { "standalone" } else { "-" };
    let pid_text = pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
    let source = record
        .source_folder
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:<20} {:<8} {:<8} {:<10} {:<6} {:<9} {source}",
        record.name,
        if running { "running" } else { "stopped" },
        pid_text,
        mode,
        if record.auto_watch { "auto" } else { "manual" },
        format!("{}s", record.watch_interval_sec),
    );
    if running {
        if let Ok(queue) = queue_status(context.state(), &record.name) {
            if queue.unique_pending > 0 {
                println!("  enrichment queue: {} paths pending", queue.unique_pending);
            }
        }
    }
}

fn status(context: &Context, name: Option<&str>) -> Result<()> {
    let registry = context.registry()?;
    println!(
        "{:<20} {:<8} {:<8} {:<10} {:<6} {:<9} SOURCE",
        "NAME", "STATE", "PID", "MODE", "WATCH", "INTERVAL"
    );
    match name {
        Some(name) => {
            let record = context.require_record(name)?;
            print_status(context, &record);
        }
        None => {
            for record in registry.list() {
                print_status(context, &record);
            }
        }
    }
    Ok(())
}
