//! One-directional SQLite reconciliation with last-writer-wins conflicts.
//!
//! The engine makes the target a mirror of the source for every table named
//! in the schema map: source-only rows are inserted, rows with a strictly
//! newer source timestamp are overwritten, rows that vanished from the source
//! are deleted, and everything else is a logged `conflict_skip`. One
//! transaction per table; there is no cross-table atomicity.
//!
//! Last-writer-wins compares raw `updated_at`/`modified_at` values across two
//! independently-clocked databases. Clock skew between them is an accepted,
//! documented risk, not compensated for.

use crate::core::db::{db_connect, table_exists};
use crate::core::error::DriftguardError;
use crate::core::lock::acquire_sync_lock;
use crate::core::schemas;
use crate::core::time::{self, Deadline, check_deadline};
use clap::Parser;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

const TIMESTAMP_COLUMNS: &[&str] = &["updated_at", "modified_at"];

static TABLE_NAME_RE: OnceLock<Regex> = OnceLock::new();

/// Only alphanumerics and underscores may reach a SQL identifier position.
fn sanitize_table_name(name: &str) -> Result<&str, DriftguardError> {
    let re = TABLE_NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());
    if re.is_match(name) {
        Ok(name)
    } else {
        Err(DriftguardError::ValidationError(format!(
            "invalid table name: {:?}",
            name
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Insert,
    Update,
    Delete,
    ConflictSkip,
}

impl SyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncAction::Insert => "insert",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
            SyncAction::ConflictSkip => "conflict_skip",
        }
    }
}

/// One row-level decision, emitted to the log sinks after the owning table
/// transaction commits.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncDecision {
    pub ts: String,
    pub event_id: String,
    pub source_db: String,
    pub target_db: String,
    pub table: String,
    pub row_id: i64,
    pub action: String,
}

#[derive(Debug, Clone)]
pub struct SchemaMapEntry {
    pub table: String,
    /// CREATE TABLE DDL used only when the target lacks the table and the
    /// source has no `sqlite_master` SQL to copy verbatim.
    pub create_sql: String,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source: PathBuf,
    pub target: PathBuf,
    pub schema_map: Vec<SchemaMapEntry>,
    /// Analytics database receiving one `sync_audit_log` row per decision.
    pub analytics_db: Option<PathBuf>,
    /// JSONL sink receiving one serialized [`SyncDecision`] per line.
    pub events_log: Option<PathBuf>,
}

#[derive(Debug, Serialize, Default)]
pub struct TableSyncStats {
    pub table: String,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub conflicts_skipped: u64,
}

#[derive(Debug, Serialize, Default)]
pub struct SyncReport {
    pub tables: Vec<TableSyncStats>,
    /// Tables skipped because their primary key is not a single `id` column.
    pub tables_skipped: Vec<String>,
    /// Schema-map tables with no counterpart in the source database.
    pub tables_missing_in_source: Vec<String>,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn inserted(&self) -> u64 {
        self.tables.iter().map(|t| t.inserted).sum()
    }
    pub fn updated(&self) -> u64 {
        self.tables.iter().map(|t| t.updated).sum()
    }
    pub fn deleted(&self) -> u64 {
        self.tables.iter().map(|t| t.deleted).sum()
    }
    pub fn conflicts_skipped(&self) -> u64 {
        self.tables.iter().map(|t| t.conflicts_skipped).sum()
    }
}

pub struct SyncEngine {
    config: SyncConfig,
    observer: Option<Box<dyn Fn(&SyncDecision)>>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            observer: None,
        }
    }

    /// Install an in-process hook invoked for every decision after its table
    /// commits. Observer panics are the caller's problem; observer state must
    /// not feed back into sync behavior.
    pub fn with_observer(mut self, observer: Box<dyn Fn(&SyncDecision)>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Reconcile the target against the source for every schema-map table.
    ///
    /// Missing source or target files are fatal. A per-row SQL error rolls
    /// back the current table's transaction and surfaces here; tables already
    /// processed stay committed.
    pub fn sync(&self, deadline: Option<&Deadline>) -> Result<SyncReport, DriftguardError> {
        if !self.config.source.is_file() {
            return Err(DriftguardError::NotFound(format!(
                "source database: {}",
                self.config.source.display()
            )));
        }
        if !self.config.target.is_file() {
            return Err(DriftguardError::NotFound(format!(
                "target database: {}",
                self.config.target.display()
            )));
        }
        let _lock = acquire_sync_lock(&self.config.target)?;

        let t0 = Instant::now();
        let source = db_connect(&self.config.source)?;
        let mut target = db_connect(&self.config.target)?;
        let mut report = SyncReport::default();

        for entry in &self.config.schema_map {
            check_deadline(deadline, "sync")?;
            let table = sanitize_table_name(&entry.table)?;

            if !table_exists(&source, table)? {
                report.tables_missing_in_source.push(table.to_string());
                continue;
            }
            ensure_target_table(&source, &target, table, &entry.create_sql)?;

            if primary_key_columns(&source, table)? != vec!["id".to_string()] {
                report.tables_skipped.push(table.to_string());
                continue;
            }

            let decisions = self.sync_table(&source, &mut target, table)?;
            self.emit_decisions(&decisions);
            report.tables.push(tally(table, &decisions));
        }

        report.duration_ms = t0.elapsed().as_millis() as u64;
        Ok(report)
    }

    fn sync_table(
        &self,
        source: &Connection,
        target: &mut Connection,
        table: &str,
    ) -> Result<Vec<SyncDecision>, DriftguardError> {
        let (src_cols, src_rows) = load_rows(source, table)?;
        let (tgt_cols, tgt_rows) = load_rows(target, table)?;

        let src_ts = timestamp_index(&src_cols);
        let tgt_ts = timestamp_index(&tgt_cols);
        let src_id = src_cols
            .iter()
            .position(|c| c == "id")
            .expect("load_rows guarantees an id column");

        let quoted: Vec<String> = src_cols.iter().map(|c| format!("\"{}\"", c)).collect();
        let placeholders: Vec<String> = (1..=src_cols.len()).map(|i| format!("?{}", i)).collect();
        let insert_sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            table,
            quoted.join(", "),
            placeholders.join(", ")
        );
        let non_pk: Vec<usize> = (0..src_cols.len()).filter(|&i| i != src_id).collect();
        let set_clause: Vec<String> = non_pk
            .iter()
            .enumerate()
            .map(|(j, &i)| format!("\"{}\" = ?{}", src_cols[i], j + 1))
            .collect();
        let update_sql = format!(
            "UPDATE \"{}\" SET {} WHERE \"id\" = ?{}",
            table,
            set_clause.join(", "),
            non_pk.len() + 1
        );
        let delete_sql = format!("DELETE FROM \"{}\" WHERE \"id\" = ?1", table);

        let mut decisions = Vec::new();
        let tx = target.transaction()?;

        for (id, src_vals) in &src_rows {
            match tgt_rows.get(id) {
                None => {
                    tx.execute(&insert_sql, params_from_iter(src_vals.iter()))?;
                    decisions.push(self.decision(table, *id, SyncAction::Insert));
                }
                Some(tgt_vals) => {
                    let source_newer = match (src_ts, tgt_ts) {
                        (Some(si), Some(ti)) => timestamp_gt(&src_vals[si], &tgt_vals[ti]),
                        _ => false,
                    };
                    if source_newer {
                        let mut values: Vec<&Value> =
                            non_pk.iter().map(|&i| &src_vals[i]).collect();
                        values.push(&src_vals[src_id]);
                        tx.execute(&update_sql, params_from_iter(values))?;
                        decisions.push(self.decision(table, *id, SyncAction::Update));
                    } else {
                        decisions.push(self.decision(table, *id, SyncAction::ConflictSkip));
                    }
                }
            }
        }

        for id in tgt_rows.keys() {
            if !src_rows.contains_key(id) {
                tx.execute(&delete_sql, params![id])?;
                decisions.push(self.decision(table, *id, SyncAction::Delete));
            }
        }

        tx.commit()?;
        Ok(decisions)
    }

    fn decision(&self, table: &str, row_id: i64, action: SyncAction) -> SyncDecision {
        SyncDecision {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            source_db: self.config.source.to_string_lossy().to_string(),
            target_db: self.config.target.to_string_lossy().to_string(),
            table: table.to_string(),
            row_id,
            action: action.as_str().to_string(),
        }
    }

    /// Fan decisions out to the observer, the JSONL sink, and the analytics
    /// table. All three are best-effort: a failed sink never alters the sync
    /// outcome the caller already holds.
    fn emit_decisions(&self, decisions: &[SyncDecision]) {
        if let Some(observer) = &self.observer {
            for d in decisions {
                observer(d);
            }
        }
        if let Some(path) = &self.config.events_log {
            let _ = append_jsonl(path, decisions);
        }
        if let Some(db) = &self.config.analytics_db {
            let _ = log_decisions_to_analytics(db, decisions);
        }
    }
}

fn tally(table: &str, decisions: &[SyncDecision]) -> TableSyncStats {
    let mut stats = TableSyncStats {
        table: table.to_string(),
        ..Default::default()
    };
    for d in decisions {
        match d.action.as_str() {
            "insert" => stats.inserted += 1,
            "update" => stats.updated += 1,
            "delete" => stats.deleted += 1,
            _ => stats.conflicts_skipped += 1,
        }
    }
    stats
}

/// Copy the source's CREATE TABLE SQL verbatim when the target lacks the
/// table; fall back to the schema-map DDL. An existing target schema is never
/// altered.
fn ensure_target_table(
    source: &Connection,
    target: &Connection,
    table: &str,
    fallback_sql: &str,
) -> Result<(), DriftguardError> {
    if table_exists(target, table)? {
        return Ok(());
    }
    let src_sql: Option<Option<String>> = source
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type='table' AND name=?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;
    let ddl = src_sql
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| fallback_sql.to_string());
    target.execute_batch(&ddl)?;
    Ok(())
}

fn primary_key_columns(
    conn: &Connection,
    table: &str,
) -> Result<Vec<String>, DriftguardError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(1)?, row.get::<_, i64>(5)?))
    })?;
    let mut pk = Vec::new();
    for r in rows {
        let (name, flag) = r?;
        if flag > 0 {
            pk.push(name);
        }
    }
    Ok(pk)
}

type RowMap = FxHashMap<i64, Vec<Value>>;

/// Load every row of `table` keyed by its integer `id`. This bounds the
/// engine to working sets that fit in memory; streaming sync of arbitrarily
/// large tables is an explicit non-goal.
fn load_rows(conn: &Connection, table: &str) -> Result<(Vec<String>, RowMap), DriftguardError> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM \"{}\"", table))?;
    let cols: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let id_idx = cols.iter().position(|c| c == "id").ok_or_else(|| {
        DriftguardError::ValidationError(format!("table {} has no id column", table))
    })?;

    let mapped = stmt.query_map([], |row| {
        let mut vals = Vec::with_capacity(cols.len());
        for i in 0..cols.len() {
            vals.push(row.get::<_, Value>(i)?);
        }
        Ok(vals)
    })?;

    let mut rows = RowMap::default();
    for r in mapped {
        let vals = r?;
        let id = match &vals[id_idx] {
            Value::Integer(i) => *i,
            other => {
                return Err(DriftguardError::ValidationError(format!(
                    "table {} has non-integer id: {:?}",
                    table, other
                )));
            }
        };
        rows.insert(id, vals);
    }
    Ok((cols, rows))
}

fn timestamp_index(cols: &[String]) -> Option<usize> {
    TIMESTAMP_COLUMNS
        .iter()
        .find_map(|ts| cols.iter().position(|c| c == ts))
}

/// Strictly-greater comparison of raw timestamp values. Mixed or non-orderable
/// types never justify an overwrite.
fn timestamp_gt(src: &Value, tgt: &Value) -> bool {
    match (src, tgt) {
        (Value::Integer(a), Value::Integer(b)) => a > b,
        (Value::Real(a), Value::Real(b)) => a > b,
        (Value::Integer(a), Value::Real(b)) => (*a as f64) > *b,
        (Value::Real(a), Value::Integer(b)) => *a > (*b as f64),
        (Value::Text(a), Value::Text(b)) => a > b,
        _ => false,
    }
}

fn append_jsonl(path: &Path, decisions: &[SyncDecision]) -> Result<(), DriftguardError> {
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(DriftguardError::IoError)?;
    for d in decisions {
        let line = serde_json::to_string(d)
            .map_err(|e| DriftguardError::ValidationError(e.to_string()))?;
        writeln!(f, "{}", line).map_err(DriftguardError::IoError)?;
    }
    Ok(())
}

fn log_decisions_to_analytics(
    analytics_db: &Path,
    decisions: &[SyncDecision],
) -> Result<(), DriftguardError> {
    let mut conn = db_connect(analytics_db)?;
    conn.execute(schemas::SYNC_AUDIT_LOG_SCHEMA, [])?;
    conn.execute(schemas::SYNC_AUDIT_LOG_INDEX_TABLE, [])?;
    let tx = conn.transaction()?;
    for d in decisions {
        tx.execute(
            "INSERT INTO sync_audit_log(source_db, target_db, table_name, action, row_id, timestamp) VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![d.source_db, d.target_db, d.table, d.action, d.row_id, d.ts],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Load a schema map from a TOML file with a `[tables]` section mapping table
/// names to CREATE TABLE DDL strings.
pub fn load_schema_map(path: &Path) -> Result<Vec<SchemaMapEntry>, DriftguardError> {
    let content = std::fs::read_to_string(path).map_err(DriftguardError::IoError)?;
    let value: toml::Table = content
        .parse()
        .map_err(|e| DriftguardError::ValidationError(format!("schema map: {}", e)))?;
    let tables = value
        .get("tables")
        .and_then(|v| v.as_table())
        .ok_or_else(|| {
            DriftguardError::ValidationError("schema map needs a [tables] section".to_string())
        })?;
    let mut entries = Vec::new();
    for (name, ddl) in tables {
        let create_sql = ddl.as_str().ok_or_else(|| {
            DriftguardError::ValidationError(format!(
                "schema map entry {:?} must be a DDL string",
                name
            ))
        })?;
        entries.push(SchemaMapEntry {
            table: name.clone(),
            create_sql: create_sql.to_string(),
        });
    }
    Ok(entries)
}

#[derive(Parser, Debug)]
#[clap(name = "sync", about = "Reconcile a target SQLite database against a source")]
pub struct SyncCli {
    /// Source database path (authoritative side).
    #[clap(long)]
    pub source: PathBuf,
    /// Target database path (made to mirror the source).
    #[clap(long)]
    pub target: PathBuf,
    /// TOML schema map: [tables] name = "CREATE TABLE ..."
    #[clap(long = "schema-map")]
    pub schema_map: PathBuf,
    /// Analytics database for per-decision sync_audit_log rows.
    #[clap(long)]
    pub analytics: Option<PathBuf>,
    /// JSONL decision sink.
    #[clap(long = "events-log")]
    pub events_log: Option<PathBuf>,
    /// Abort at the next table boundary after this many seconds.
    #[clap(long = "timeout-secs")]
    pub timeout_secs: Option<u64>,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

pub fn run_sync_cli(cli: SyncCli) -> Result<(), DriftguardError> {
    use colored::Colorize;

    let schema_map = load_schema_map(&cli.schema_map)?;
    let engine = SyncEngine::new(SyncConfig {
        source: cli.source,
        target: cli.target,
        schema_map,
        analytics_db: cli.analytics,
        events_log: cli.events_log,
    });
    let deadline = cli
        .timeout_secs
        .map(|s| Deadline::expires_in(std::time::Duration::from_secs(s)));
    let report = engine.sync(deadline.as_ref())?;

    if cli.format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&report)
                .map_err(|e| DriftguardError::ValidationError(e.to_string()))?
        );
    } else {
        for t in &report.tables {
            println!(
                "  {} {}: +{} ~{} -{} ({} skipped)",
                "●".bright_cyan(),
                t.table,
                t.inserted,
                t.updated,
                t.deleted,
                t.conflicts_skipped
            );
        }
        for t in &report.tables_skipped {
            println!("  {} {}: skipped (primary key is not 'id')", "○".yellow(), t);
        }
        println!(
            "{} sync complete in {}ms: {} inserted, {} updated, {} deleted",
            "✓".bright_green(),
            report.duration_ms,
            report.inserted(),
            report.updated(),
            report.deleted()
        );
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "sync",
        "version": "0.1.0",
        "description": "One-directional SQLite reconciliation with last-writer-wins conflicts",
        "commands": [
            { "name": "sync", "parameters": ["source", "target", "schema-map", "analytics", "events-log", "timeout-secs"] }
        ],
        "storage": ["sync_audit_log", "*.events.jsonl"]
    })
}
