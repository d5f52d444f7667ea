//! Driftguard: database-first synchronization and consistency auditing.
//!
//! **Driftguard keeps SQLite stores and the filesystem telling the same
//! story.** The database is the source of truth; files are replaceable
//! projections of it.
//!
//! # Core Principles
//!
//! - **Database-first**: SQLite rows are authoritative; content hashes are
//!   the change-detection fingerprint
//! - **Idempotent**: re-running any operation on unchanged inputs is a no-op
//! - **Observable**: every sync decision, ingestion attempt, and audit run
//!   lands in an event table or JSONL sink
//! - **Best-effort recovery**: logging, remediation commands, and WAL
//!   checkpoints never abort the primary operation
//!
//! # Subsystems (Plugins)
//!
//! - `sync`: one-directional source→target reconciliation with
//!   last-writer-wins conflict resolution
//! - `ingest`: content-addressed artifact ingestion (HAR captures, shell
//!   logs) with append-only history
//! - `audit`: DB↔filesystem drift detection with optional best-effort
//!   regenerate/reingest hooks
//! - `events`: read-side observability over the event tables
//!
//! # Examples
//!
//! ```bash
//! # Ingest HAR captures
//! driftguard ingest har --db assets.db --root har/
//!
//! # Mirror a source database into a target
//! driftguard sync --source prod.db --target replica.db --schema-map map.toml
//!
//! # Audit tracked assets against disk
//! driftguard audit --asset-db assets.db --base har/ --pattern '**/*.har'
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: connections, hashing, discovery, deadlines, locks, schemas
//! - [`plugins`]: subsystem implementations (sync, ingest, audit, events)

pub mod core;
pub mod plugins;

use crate::core::error;
use plugins::{analytics, audit, ingest, sync};

use clap::{Parser, Subcommand};

pub const DRIFTGUARD_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[clap(
    name = "driftguard",
    version = env!("CARGO_PKG_VERSION"),
    about = "Database-first synchronization and consistency-audit core"
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile a target SQLite database against a source.
    Sync(sync::SyncCli),
    /// Ingest artifact files with content-addressed deduplication.
    Ingest(ingest::IngestCli),
    /// Audit drift between asset databases and the filesystem.
    Audit(audit::AuditCli),
    /// List recent sync/audit/ingest events.
    Events(analytics::EventsCli),
    /// Print the JSON schema for every subsystem.
    Schema,
    /// Print the driftguard version.
    Version,
}

pub fn run() -> Result<(), error::DriftguardError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Sync(sync_cli) => sync::run_sync_cli(sync_cli),
        Command::Ingest(ingest_cli) => ingest::run_ingest_cli(ingest_cli),
        Command::Audit(audit_cli) => audit::run_audit_cli(audit_cli),
        Command::Events(events_cli) => analytics::run_events_cli(events_cli),
        Command::Schema => {
            let schemas = serde_json::json!({
                "name": "driftguard",
                "version": DRIFTGUARD_VERSION,
                "subsystems": [
                    sync::schema(),
                    ingest::schema(),
                    audit::schema(),
                    analytics::schema(),
                ]
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&schemas)
                    .map_err(|e| error::DriftguardError::ValidationError(e.to_string()))?
            );
            Ok(())
        }
        Command::Version => {
            println!("v{}", DRIFTGUARD_VERSION);
            Ok(())
        }
    }
}
