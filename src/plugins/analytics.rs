//! Read-side observability over the audit/event tables.
//!
//! Missing databases and missing tables yield empty lists, not errors: the
//! reader is for dashboards and operators, never on a write path.

use crate::core::db::{db_connect, table_exists};
use crate::core::error::DriftguardError;
use clap::{Parser, Subcommand};
use rusqlite::params;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct SyncLogRow {
    pub source_db: String,
    pub target_db: String,
    pub table_name: String,
    pub action: String,
    pub row_id: i64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct AuditEventRow {
    pub started_at: String,
    pub finished_at: String,
    pub scanned_paths: i64,
    pub missing_count: i64,
    pub stale_count: i64,
    pub regenerated_count: i64,
    pub reingested_count: i64,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct IngestEventRow {
    pub occurred_at: String,
    pub kind: String,
    pub source: String,
    pub target_table: String,
    pub target_pk: Option<i64>,
    pub status: String,
    pub sha256: Option<String>,
}

pub fn list_sync_events(
    analytics_db: &Path,
    limit: u32,
) -> Result<Vec<SyncLogRow>, DriftguardError> {
    if !analytics_db.is_file() {
        return Ok(Vec::new());
    }
    let conn = db_connect(analytics_db)?;
    if !table_exists(&conn, "sync_audit_log")? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT source_db, target_db, table_name, action, row_id, timestamp FROM sync_audit_log ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(SyncLogRow {
            source_db: row.get(0)?,
            target_db: row.get(1)?,
            table_name: row.get(2)?,
            action: row.get(3)?,
            row_id: row.get(4)?,
            timestamp: row.get(5)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(DriftguardError::RusqliteError)
}

pub fn list_audit_events(
    analytics_db: &Path,
    limit: u32,
) -> Result<Vec<AuditEventRow>, DriftguardError> {
    if !analytics_db.is_file() {
        return Ok(Vec::new());
    }
    let conn = db_connect(analytics_db)?;
    if !table_exists(&conn, "consistency_audit_events")? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT started_at, finished_at, scanned_paths, missing_count, stale_count, regenerated_count, reingested_count, status FROM consistency_audit_events ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(AuditEventRow {
            started_at: row.get(0)?,
            finished_at: row.get(1)?,
            scanned_paths: row.get(2)?,
            missing_count: row.get(3)?,
            stale_count: row.get(4)?,
            regenerated_count: row.get(5)?,
            reingested_count: row.get(6)?,
            status: row.get(7)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(DriftguardError::RusqliteError)
}

pub fn list_ingest_events(
    db: &Path,
    limit: u32,
) -> Result<Vec<IngestEventRow>, DriftguardError> {
    if !db.is_file() {
        return Ok(Vec::new());
    }
    let conn = db_connect(db)?;
    if !table_exists(&conn, "ingest_events")? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT occurred_at, kind, source, target_table, target_pk, status, sha256 FROM ingest_events ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(IngestEventRow {
            occurred_at: row.get(0)?,
            kind: row.get(1)?,
            source: row.get(2)?,
            target_table: row.get(3)?,
            target_pk: row.get(4)?,
            status: row.get(5)?,
            sha256: row.get(6)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(DriftguardError::RusqliteError)
}

#[derive(Parser, Debug)]
#[clap(name = "events", about = "List recent sync/audit/ingest events")]
pub struct EventsCli {
    #[clap(subcommand)]
    pub command: EventsCommand,
}

#[derive(Subcommand, Debug)]
pub enum EventsCommand {
    /// Recent sync decisions from the analytics database.
    Sync {
        #[clap(long)]
        db: PathBuf,
        #[clap(long, default_value = "10")]
        limit: u32,
    },
    /// Recent consistency audit runs from the analytics database.
    Audit {
        #[clap(long)]
        db: PathBuf,
        #[clap(long, default_value = "10")]
        limit: u32,
    },
    /// Recent ingestion attempts from an ingest target database.
    Ingest {
        #[clap(long)]
        db: PathBuf,
        #[clap(long, default_value = "10")]
        limit: u32,
    },
}

pub fn run_events_cli(cli: EventsCli) -> Result<(), DriftguardError> {
    let json = match cli.command {
        EventsCommand::Sync { db, limit } => serde_json::to_value(list_sync_events(&db, limit)?),
        EventsCommand::Audit { db, limit } => serde_json::to_value(list_audit_events(&db, limit)?),
        EventsCommand::Ingest { db, limit } => {
            serde_json::to_value(list_ingest_events(&db, limit)?)
        }
    }
    .map_err(|e| DriftguardError::ValidationError(e.to_string()))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json)
            .map_err(|e| DriftguardError::ValidationError(e.to_string()))?
    );
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "events",
        "version": "0.1.0",
        "description": "Observability reader over sync/audit/ingest event tables",
        "commands": [
            { "name": "sync", "parameters": ["db", "limit"] },
            { "name": "audit", "parameters": ["db", "limit"] },
            { "name": "ingest", "parameters": ["db", "limit"] }
        ],
        "storage": []
    })
}
