//! Content-addressed artifact ingestion.
//!
//! Discovered files are hashed (streaming SHA-256) and inserted with
//! `INSERT OR IGNORE` behind a unique `(path, hash)` index, so re-running
//! ingestion over an unchanged tree is a no-op and a changed file lands as a
//! new row: history is append-only, rows are never updated in place. Every
//! attempt, successful or not, is logged to the `ingest_events` table living
//! in the same database file.

use crate::core::db::{db_connect, wal_checkpoint_if_large};
use crate::core::error::DriftguardError;
use crate::core::hash::hash_file;
use crate::core::schemas;
use crate::core::time::{self, Deadline, check_deadline};
use crate::core::walk::{self, Discovery};
use clap::{Parser, Subcommand};
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

/// A family of artifacts the ingestor knows how to file: where they live on
/// disk, which table they land in, and what lightweight metrics to extract.
pub trait ArtifactKind {
    fn kind(&self) -> &'static str;
    fn table(&self) -> &'static str;
    fn patterns(&self) -> &[&'static str];
    fn schema_sql(&self) -> &[&'static str];
    /// Per-file metrics blob. An error here counts the file as an ingestion
    /// error; the rest of the batch continues.
    fn metrics(&self, path: &Path) -> Result<JsonValue, DriftguardError>;
    /// Kind-specific columns beyond (path, sha256, size_bytes, created_at,
    /// metrics_json).
    fn extra_columns(&self, _path: &Path, _metrics: &JsonValue) -> Vec<(&'static str, Value)> {
        Vec::new()
    }
}

/// HTTP Archive captures: `**/*.har` into `har_entries`.
pub struct HarKind;

impl ArtifactKind for HarKind {
    fn kind(&self) -> &'static str {
        "har"
    }
    fn table(&self) -> &'static str {
        "har_entries"
    }
    fn patterns(&self) -> &[&'static str] {
        &["**/*.har"]
    }
    fn schema_sql(&self) -> &[&'static str] {
        &[
            schemas::HAR_ENTRIES_SCHEMA,
            schemas::HAR_ENTRIES_INDEX_DEDUPE,
            schemas::HAR_ENTRIES_INDEX_CREATED,
        ]
    }

    fn metrics(&self, path: &Path) -> Result<JsonValue, DriftguardError> {
        let text = std::fs::read_to_string(path).map_err(DriftguardError::IoError)?;
        let data: JsonValue = serde_json::from_str(&text).map_err(|e| {
            DriftguardError::ValidationError(format!("{}: not a HAR file: {}", path.display(), e))
        })?;
        let log = &data["log"];
        let pages = log["pages"].as_array().map(|a| a.len()).unwrap_or(0);
        let entries = log["entries"].as_array();
        let entry_count = entries.map(|a| a.len()).unwrap_or(0);
        let total_bytes: i64 = entries
            .map(|a| {
                a.iter()
                    .filter_map(|e| e["response"]["bodySize"].as_i64())
                    .filter(|&b| b >= 0)
                    .sum()
            })
            .unwrap_or(0);
        Ok(serde_json::json!({
            "pages_count": pages,
            "entries_count": entry_count,
            "total_bytes": total_bytes,
        }))
    }
}

/// Shell session logs: `**/*.log` and `**/*.out` into `shell_logs`.
pub struct ShellLogKind;

static SESSION_RE: OnceLock<Regex> = OnceLock::new();

fn session_re() -> &'static Regex {
    SESSION_RE.get_or_init(|| {
        Regex::new(r"(?P<source>[^_\s]+)__session_(?P<sid>[0-9T:\-]+)").unwrap()
    })
}

impl ArtifactKind for ShellLogKind {
    fn kind(&self) -> &'static str {
        "shell_log"
    }
    fn table(&self) -> &'static str {
        "shell_logs"
    }
    fn patterns(&self) -> &[&'static str] {
        &["**/*.log", "**/*.out"]
    }
    fn schema_sql(&self) -> &[&'static str] {
        &[
            schemas::SHELL_LOGS_SCHEMA,
            schemas::SHELL_LOGS_INDEX_DEDUPE,
            schemas::SHELL_LOGS_INDEX_SESSION,
        ]
    }

    fn metrics(&self, path: &Path) -> Result<JsonValue, DriftguardError> {
        let bytes = std::fs::read(path).map_err(DriftguardError::IoError)?;
        let text = String::from_utf8_lossy(&bytes);
        let name = path.file_name().map(|n| n.to_string_lossy().to_string());
        let (source, session_id) = name
            .as_deref()
            .and_then(|n| session_re().captures(n))
            .map(|c| (Some(c["source"].to_string()), Some(c["sid"].to_string())))
            .unwrap_or((None, None));
        Ok(serde_json::json!({
            "lines": text.lines().count(),
            "source": source,
            "session_id": session_id,
        }))
    }

    fn extra_columns(&self, _path: &Path, metrics: &JsonValue) -> Vec<(&'static str, Value)> {
        let session = match metrics["session_id"].as_str() {
            Some(s) => Value::Text(s.to_string()),
            None => Value::Null,
        };
        vec![("session_id", session)]
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub db: PathBuf,
    pub roots: Vec<PathBuf>,
    /// Request a truncating WAL checkpoint after the batch.
    pub checkpoint_wal: bool,
}

#[derive(Debug, Serialize, Default)]
pub struct IngestResult {
    pub kind: String,
    pub table: String,
    pub inserted: u64,
    /// Duplicates and zero-byte files.
    pub skipped: u64,
    pub errors: u64,
    pub duration_ms: u64,
}

pub struct Ingestor {
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    /// Lazy walk of the configured roots for this kind's patterns.
    pub fn discover(&self, kind: &dyn ArtifactKind) -> Result<Discovery, DriftguardError> {
        let patterns: Vec<String> = kind.patterns().iter().map(|s| s.to_string()).collect();
        walk::discover(&self.config.roots, &patterns)
    }

    /// Ingest every discovered file. Per-file failures increment `errors` and
    /// the batch continues; only infrastructure failures (connection, commit,
    /// deadline) surface as `Err`.
    pub fn ingest(
        &self,
        kind: &dyn ArtifactKind,
        deadline: Option<&Deadline>,
    ) -> Result<IngestResult, DriftguardError> {
        let t0 = Instant::now();
        let mut result = IngestResult {
            kind: kind.kind().to_string(),
            table: kind.table().to_string(),
            ..Default::default()
        };

        let files = self.discover(kind)?;
        let mut conn = db_connect(&self.config.db)?;
        for ddl in kind.schema_sql() {
            conn.execute_batch(ddl)?;
        }
        let _ = conn.execute_batch(schemas::INGEST_EVENTS_SCHEMA);
        let _ = conn.execute_batch(schemas::INGEST_EVENTS_INDEX_OCCURRED);

        let tx = conn.transaction()?;
        for path in files {
            check_deadline(deadline, "ingest")?;
            self.ingest_one(&tx, kind, &path, &mut result);
        }
        tx.commit()?;

        if self.config.checkpoint_wal {
            wal_checkpoint_if_large(&conn, &self.config.db);
        }

        result.duration_ms = t0.elapsed().as_millis() as u64;
        Ok(result)
    }

    fn ingest_one(
        &self,
        conn: &Connection,
        kind: &dyn ArtifactKind,
        path: &Path,
        result: &mut IngestResult,
    ) {
        let source = path.to_string_lossy().to_string();

        let size = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            Err(_) => {
                result.errors += 1;
                log_event(conn, kind.kind(), &source, kind.table(), None, "error", None, None);
                return;
            }
        };
        if size == 0 {
            result.skipped += 1;
            log_event(conn, kind.kind(), &source, kind.table(), None, "skipped_zero", None, None);
            return;
        }

        let sha256 = match hash_file(path) {
            Ok(h) => h,
            Err(_) => {
                result.errors += 1;
                log_event(conn, kind.kind(), &source, kind.table(), None, "error", None, None);
                return;
            }
        };

        let metrics = match kind.metrics(path) {
            Ok(m) => m,
            Err(_) => {
                result.errors += 1;
                log_event(
                    conn,
                    kind.kind(),
                    &source,
                    kind.table(),
                    None,
                    "error",
                    Some(&sha256),
                    None,
                );
                return;
            }
        };

        let mut columns: Vec<&'static str> =
            vec!["path", "sha256", "size_bytes", "created_at", "metrics_json"];
        let metrics_text = metrics.to_string();
        let mut values: Vec<Value> = vec![
            Value::Text(source.clone()),
            Value::Text(sha256.clone()),
            Value::Integer(size as i64),
            Value::Text(time::now_epoch_z()),
            Value::Text(metrics_text.clone()),
        ];
        for (col, val) in kind.extra_columns(path, &metrics) {
            columns.push(col);
            values.push(val);
        }
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT OR IGNORE INTO \"{}\" ({}) VALUES ({})",
            kind.table(),
            columns
                .iter()
                .map(|c| format!("\"{}\"", c))
                .collect::<Vec<_>>()
                .join(", "),
            placeholders.join(", ")
        );

        match conn.execute(&sql, params_from_iter(values.iter())) {
            Ok(1) => {
                result.inserted += 1;
                let pk = conn.last_insert_rowid();
                log_event(
                    conn,
                    kind.kind(),
                    &source,
                    kind.table(),
                    Some(pk),
                    "inserted",
                    Some(&sha256),
                    Some(&metrics_text),
                );
            }
            Ok(_) => {
                result.skipped += 1;
                log_event(
                    conn,
                    kind.kind(),
                    &source,
                    kind.table(),
                    None,
                    "duplicate",
                    Some(&sha256),
                    None,
                );
            }
            Err(_) => {
                result.errors += 1;
                log_event(
                    conn,
                    kind.kind(),
                    &source,
                    kind.table(),
                    None,
                    "error",
                    Some(&sha256),
                    None,
                );
            }
        }
    }
}

/// Best-effort append to `ingest_events`. A failed log write is a void side
/// effect; it never raises out of the ingestion loop.
#[allow(clippy::too_many_arguments)]
fn log_event(
    conn: &Connection,
    kind: &str,
    source: &str,
    target_table: &str,
    target_pk: Option<i64>,
    status: &str,
    sha256: Option<&str>,
    metrics_json: Option<&str>,
) {
    let _ = conn.execute(
        "INSERT INTO ingest_events(occurred_at, kind, source, target_table, target_pk, status, sha256, metrics_json) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            time::now_epoch_z(),
            kind,
            source,
            target_table,
            target_pk,
            status,
            sha256,
            metrics_json
        ],
    );
}

#[derive(Parser, Debug)]
#[clap(name = "ingest", about = "Idempotent content-addressed artifact ingestion")]
pub struct IngestCli {
    #[clap(subcommand)]
    pub command: IngestCommand,
}

#[derive(Subcommand, Debug)]
pub enum IngestCommand {
    /// Ingest HAR captures into har_entries.
    Har {
        /// Target database path.
        #[clap(long)]
        db: PathBuf,
        /// Root directory or file to scan (repeatable).
        #[clap(long = "root", required = true)]
        roots: Vec<PathBuf>,
        /// Request a WAL checkpoint after the batch.
        #[clap(long = "checkpoint-wal")]
        checkpoint_wal: bool,
        /// Abort at the next file boundary after this many seconds.
        #[clap(long = "timeout-secs")]
        timeout_secs: Option<u64>,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Ingest shell logs into shell_logs.
    Logs {
        #[clap(long)]
        db: PathBuf,
        #[clap(long = "root", required = true)]
        roots: Vec<PathBuf>,
        #[clap(long = "checkpoint-wal")]
        checkpoint_wal: bool,
        #[clap(long = "timeout-secs")]
        timeout_secs: Option<u64>,
        #[clap(long, default_value = "text")]
        format: String,
    },
}

pub fn run_ingest_cli(cli: IngestCli) -> Result<(), DriftguardError> {
    let (kind, db, roots, checkpoint_wal, timeout_secs, format): (
        Box<dyn ArtifactKind>,
        _,
        _,
        _,
        _,
        _,
    ) = match cli.command {
        IngestCommand::Har {
            db,
            roots,
            checkpoint_wal,
            timeout_secs,
            format,
        } => (Box::new(HarKind), db, roots, checkpoint_wal, timeout_secs, format),
        IngestCommand::Logs {
            db,
            roots,
            checkpoint_wal,
            timeout_secs,
            format,
        } => (
            Box::new(ShellLogKind),
            db,
            roots,
            checkpoint_wal,
            timeout_secs,
            format,
        ),
    };

    let ingestor = Ingestor::new(IngestConfig {
        db,
        roots,
        checkpoint_wal,
    });
    let deadline = timeout_secs.map(|s| Deadline::expires_in(std::time::Duration::from_secs(s)));
    let result = ingestor.ingest(kind.as_ref(), deadline.as_ref())?;

    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&result)
                .map_err(|e| DriftguardError::ValidationError(e.to_string()))?
        );
    } else {
        use colored::Colorize;
        println!(
            "{} {} ingest into {}: {} inserted, {} skipped, {} errors ({}ms)",
            "✓".bright_green(),
            result.kind,
            result.table,
            result.inserted,
            result.skipped,
            result.errors,
            result.duration_ms
        );
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "ingest",
        "version": "0.1.0",
        "description": "Idempotent content-addressed ingestion of artifact files",
        "commands": [
            { "name": "har", "parameters": ["db", "root", "checkpoint-wal", "timeout-secs"] },
            { "name": "logs", "parameters": ["db", "root", "checkpoint-wal", "timeout-secs"] }
        ],
        "storage": ["har_entries", "shell_logs", "ingest_events"]
    })
}
