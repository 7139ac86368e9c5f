//! Alert inspection and management.

use anyhow::Result;
use clap::Subcommand;
use hybridrag_core::error::RagError;
use hybridrag_core::monitor::{AlertFilter, AlertSeverity};

use crate::context::Context;

#[derive(Subcommand, Debug)]
pub enum AlertsCommand {
    /// List alerts, newest last
    List {
        /// Only alerts for this database
        #[arg(long)]
        db: Option<String>,
        /// Only alerts of this severity (info, warning, error, critical)
        #[arg(long)]
        severity: Option<String>,
        /// Include acknowledged alerts
        #[arg(long)]
        all: bool,
    },
    /// Acknowledge one alert by id
    Ack { id: String },
    /// Acknowledge all alerts, optionally for one database
    AckAll {
        #[arg(long)]
        db: Option<String>,
    },
    /// Remove alerts older than N days
    Clear {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
    /// Counts of unacknowledged alerts by severity
    Summary,
}

fn parse_severity(value: &str) -> Result<AlertSeverity> {
    match value {
        "info" => Ok(AlertSeverity::Info),
        "warning" => Ok(AlertSeverity::Warning),
        "error" => Ok(AlertSeverity::Error),
        "critical" => Ok(AlertSeverity::Critical),
        other => Err(RagError::Config(format!(
            "invalid severity '{other}' (expected info, warning, error, or critical)"
        ))
        .into()),
    }
}

pub fn run(context: &Context, command: AlertsCommand) -> Result<()> {
    let alerts = context.alerts();
    let store = alerts.store();

    match command {
        AlertsCommand::List { db, severity, all } => {
            let filter = AlertFilter {
                database: db,
                severity: severity.as_deref().map(parse_severity).transpose()?,
                include_acked: all,
            };
            let listed = store.list(&filter);
            if listed.is_empty() {
                println!("No alerts");
                return Ok(());
            }
            for alert in listed {
                let ack = if alert.acknowledged { " (acked)" } else { "" };
                println!(
                    "{} [{}] [{}] {}{ack}",
                    alert.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    alert.severity,
                    alert.database,
                    alert.message
                );
                println!("  id: {}", alert.id);
            }
        }
        AlertsCommand::Ack { id } => {
            if store.acknowledge(&id) {
                println!("Acknowledged {id}");
            } else {
                return Err(RagError::NotFound(format!("alert {id}")).into());
            }
        }
        AlertsCommand::AckAll { db } => {
            store.acknowledge_all(db.as_deref());
            println!("Acknowledged all alerts{}", db.map(|d| format!(" for {d}")).unwrap_or_default());
        }
        AlertsCommand::Clear { days } => {
            let removed = store.clear_older_than(days);
            println!("Removed {removed} alerts older than {days} days");
        }
        AlertsCommand::Summary => {
            let summary = store.summary();
            println!("critical : {}", summary.critical);
            println!("error    : {}", summary.error);
            println!("warning  : {}", summary.warning);
            println!("info     : {}", summary.info);
            println!("total    : {}", summary.total);
        }
    }
    Ok(())
}
