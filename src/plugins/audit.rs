//! DB↔filesystem consistency auditing.
//!
//! The auditor loads (path, content_hash) pairs from asset-tracking tables,
//! walks the configured base paths, and classifies drift: a tracked file
//! whose recomputed hash differs is **stale**, a tracked path gone from disk
//! is **missing**, a matching file no asset table knows about is
//! **untracked**. The auditor favors partial results over total failure: an
//! unopenable database contributes an empty asset set, a missing table is
//! zero rows, an unhashable file is excluded from every classification.

use crate::core::db::{db_connect, integrity_probe, table_exists};
use crate::core::error::DriftguardError;
use crate::core::exec;
use crate::core::hash::hash_file;
use crate::core::schemas;
use crate::core::time::{self, Deadline, check_deadline};
use crate::core::walk;
use clap::Parser;
use rusqlite::params;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const DEFAULT_DETAILS_CAP: usize = 25;

/// Where an asset table keeps its path and hash. `hash_expr` is a SQL
/// expression, not a bare column, so legacy dual-column tables keep working.
#[derive(Debug, Clone)]
pub struct AssetTableSpec {
    pub table: String,
    pub path_col: String,
    pub hash_expr: String,
}

impl AssetTableSpec {
    /// The asset tables this toolkit knows about. Probed defensively: a
    /// database lacking one simply contributes no rows for it.
    pub fn known() -> Vec<AssetTableSpec> {
        vec![
            AssetTableSpec {
                table: "har_entries".to_string(),
                path_col: "path".to_string(),
                hash_expr: "COALESCE(sha256, content_hash)".to_string(),
            },
            AssetTableSpec {
                table: "shell_logs".to_string(),
                path_col: "path".to_string(),
                hash_expr: "sha256".to_string(),
            },
            AssetTableSpec {
                table: "documentation_assets".to_string(),
                path_col: "doc_path".to_string(),
                hash_expr: "content_hash".to_string(),
            },
        ]
    }
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub asset_dbs: Vec<PathBuf>,
    pub base_paths: Vec<PathBuf>,
    pub patterns: Vec<String>,
    pub asset_tables: Vec<AssetTableSpec>,
    /// Analytics database receiving one `consistency_audit_events` row per run.
    pub analytics_db: Option<PathBuf>,
    /// External command invoked when stale paths were found and regeneration
    /// was requested. Opaque argv; best-effort.
    pub regenerate_cmd: Option<Vec<String>>,
    /// External command invoked when missing or stale paths were found and
    /// reingestion was requested.
    pub reingest_cmd: Option<Vec<String>>,
    /// Maximum per-item detail entries kept in results and persisted rows.
    pub details_cap: usize,
}

#[derive(Debug, Serialize, Clone)]
pub struct StalePath {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct DbIntegrity {
    pub db: String,
    /// `ok`, a corruption description, or `unreadable: <err>`.
    pub result: String,
}

#[derive(Debug, Serialize)]
pub struct AuditResult {
    pub started_at: String,
    pub finished_at: String,
    pub status: String,
    pub scanned_paths: u64,
    pub missing_count: u64,
    pub stale_count: u64,
    pub untracked_count: u64,
    pub regenerated_count: u64,
    pub reingested_count: u64,
    /// Detail lists are capped at `details_cap`; counts are not.
    pub missing_paths: Vec<String>,
    pub stale_paths: Vec<StalePath>,
    pub untracked_paths: Vec<String>,
    pub integrity: Vec<DbIntegrity>,
    pub duration_ms: u64,
}

pub struct ConsistencyAuditor {
    config: AuditConfig,
}

impl ConsistencyAuditor {
    pub fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    /// One audit pass: probe, load, scan, compare, optionally regenerate and
    /// reingest, then log. There is no persisted in-progress state; a crash
    /// mid-run produces no audit event row (at-most-once logging).
    pub fn run_audit(
        &self,
        regenerate: bool,
        reingest: bool,
        deadline: Option<&Deadline>,
    ) -> Result<AuditResult, DriftguardError> {
        let started_at = time::now_epoch_z();
        let t0 = Instant::now();

        let (assets, integrity) = self.load_assets(deadline)?;

        let mut scanned = 0u64;
        let mut stale: Vec<StalePath> = Vec::new();
        let mut untracked: Vec<String> = Vec::new();
        for path in walk::discover(&self.config.base_paths, &self.config.patterns)? {
            check_deadline(deadline, "audit")?;
            scanned += 1;
            let key = path.to_string_lossy().to_string();
            match assets.get(&key) {
                Some(expected) => match hash_file(&path) {
                    Ok(actual) => {
                        if actual != *expected {
                            stale.push(StalePath {
                                path: key,
                                expected: expected.clone(),
                                actual,
                            });
                        }
                    }
                    // Unhashable files belong to neither the stale nor the
                    // verified-clean set.
                    Err(_) => {}
                },
                None => untracked.push(key),
            }
        }

        let mut missing: Vec<String> = assets
            .keys()
            .filter(|p| !Path::new(p.as_str()).exists())
            .cloned()
            .collect();
        missing.sort();

        let mut regenerated_count = 0u64;
        if regenerate && !stale.is_empty() {
            if let Some(cmd) = &self.config.regenerate_cmd {
                if let Ok(outcome) = exec::run_command(cmd, Path::new(".")) {
                    if outcome.success {
                        regenerated_count = stale.len() as u64;
                    }
                }
            }
        }

        let mut reingested_count = 0u64;
        if reingest && (!missing.is_empty() || !stale.is_empty()) {
            if let Some(cmd) = &self.config.reingest_cmd {
                if let Ok(outcome) = exec::run_command(cmd, Path::new(".")) {
                    if outcome.success {
                        reingested_count = (missing.len() + stale.len()) as u64;
                    }
                }
            }
        }

        let cap = self.config.details_cap;
        let missing_count = missing.len() as u64;
        let stale_count = stale.len() as u64;
        let untracked_count = untracked.len() as u64;
        missing.truncate(cap);
        stale.truncate(cap);
        untracked.truncate(cap);

        let status = if missing_count == 0 && stale_count == 0 {
            "ok"
        } else {
            "drift"
        };

        let result = AuditResult {
            started_at,
            finished_at: time::now_epoch_z(),
            status: status.to_string(),
            scanned_paths: scanned,
            missing_count,
            stale_count,
            untracked_count,
            regenerated_count,
            reingested_count,
            missing_paths: missing,
            stale_paths: stale,
            untracked_paths: untracked,
            integrity,
            duration_ms: t0.elapsed().as_millis() as u64,
        };

        // The computed result is returned to the caller even if this row
        // never lands.
        if let Some(analytics_db) = &self.config.analytics_db {
            let _ = persist_audit_event(analytics_db, &result);
        }

        Ok(result)
    }

    /// Integrity-probe each asset database and collect tracked
    /// (path, content_hash) pairs. Later databases win on duplicate paths.
    fn load_assets(
        &self,
        deadline: Option<&Deadline>,
    ) -> Result<(FxHashMap<String, String>, Vec<DbIntegrity>), DriftguardError> {
        let mut assets = FxHashMap::default();
        let mut integrity = Vec::new();

        for db_path in &self.config.asset_dbs {
            check_deadline(deadline, "audit")?;
            let db_name = db_path.to_string_lossy().to_string();
            let conn = match db_connect(db_path) {
                Ok(c) => c,
                Err(e) => {
                    integrity.push(DbIntegrity {
                        db: db_name,
                        result: format!("unreadable: {}", e),
                    });
                    continue;
                }
            };
            integrity.push(DbIntegrity {
                db: db_name,
                result: integrity_probe(&conn),
            });

            for spec in &self.config.asset_tables {
                if !table_exists(&conn, &spec.table).unwrap_or(false) {
                    continue;
                }
                let sql = format!(
                    "SELECT \"{}\", {} FROM \"{}\"",
                    spec.path_col, spec.hash_expr, spec.table
                );
                let Ok(mut stmt) = conn.prepare(&sql) else {
                    continue;
                };
                let Ok(rows) = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
                }) else {
                    continue;
                };
                for row in rows.flatten() {
                    if let (path, Some(hash)) = row {
                        assets.insert(path, hash);
                    }
                }
            }
        }
        Ok((assets, integrity))
    }
}

fn persist_audit_event(
    analytics_db: &Path,
    result: &AuditResult,
) -> Result<(), DriftguardError> {
    let conn = db_connect(analytics_db)?;
    conn.execute(schemas::CONSISTENCY_AUDIT_EVENTS_SCHEMA, [])?;
    conn.execute(schemas::CONSISTENCY_AUDIT_EVENTS_INDEX_STARTED, [])?;

    let details = serde_json::json!({
        "missing_paths": result.missing_paths,
        "stale_paths": result.stale_paths,
        "untracked_paths": result.untracked_paths,
        "integrity": result.integrity,
        "truncated": result.missing_count as usize > result.missing_paths.len()
            || result.stale_count as usize > result.stale_paths.len()
            || result.untracked_count as usize > result.untracked_paths.len(),
    });

    conn.execute(
        "INSERT INTO consistency_audit_events(started_at, finished_at, scanned_paths, missing_count, stale_count, regenerated_count, reingested_count, details_json, status) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            result.started_at,
            result.finished_at,
            result.scanned_paths as i64,
            result.missing_count as i64,
            result.stale_count as i64,
            result.regenerated_count as i64,
            result.reingested_count as i64,
            details.to_string(),
            result.status
        ],
    )?;
    Ok(())
}

#[derive(Parser, Debug)]
#[clap(name = "audit", about = "Audit drift between asset databases and the filesystem")]
pub struct AuditCli {
    /// Asset database to load tracked hashes from (repeatable).
    #[clap(long = "asset-db", required = true)]
    pub asset_dbs: Vec<PathBuf>,
    /// Base directory or file to scan (repeatable).
    #[clap(long = "base", required = true)]
    pub base_paths: Vec<PathBuf>,
    /// Glob pattern for tracked file types (repeatable; default: all files).
    #[clap(long = "pattern")]
    pub patterns: Vec<String>,
    /// Analytics database for the consistency_audit_events row.
    #[clap(long)]
    pub analytics: Option<PathBuf>,
    /// External command argv to regenerate stale assets.
    #[clap(long = "regenerate-cmd", num_args = 1..)]
    pub regenerate_cmd: Option<Vec<String>>,
    /// External command argv to reingest missing/stale assets.
    #[clap(long = "reingest-cmd", num_args = 1..)]
    pub reingest_cmd: Option<Vec<String>>,
    /// Invoke the regenerate command when stale paths are found.
    #[clap(long)]
    pub regenerate: bool,
    /// Invoke the reingest command when missing or stale paths are found.
    #[clap(long)]
    pub reingest: bool,
    /// Abort at the next file boundary after this many seconds.
    #[clap(long = "timeout-secs")]
    pub timeout_secs: Option<u64>,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

pub fn run_audit_cli(cli: AuditCli) -> Result<(), DriftguardError> {
    let auditor = ConsistencyAuditor::new(AuditConfig {
        asset_dbs: cli.asset_dbs,
        base_paths: cli.base_paths,
        patterns: cli.patterns,
        asset_tables: AssetTableSpec::known(),
        analytics_db: cli.analytics,
        regenerate_cmd: cli.regenerate_cmd,
        reingest_cmd: cli.reingest_cmd,
        details_cap: DEFAULT_DETAILS_CAP,
    });
    let deadline = cli
        .timeout_secs
        .map(|s| Deadline::expires_in(std::time::Duration::from_secs(s)));
    let result = auditor.run_audit(cli.regenerate, cli.reingest, deadline.as_ref())?;

    if cli.format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&result)
                .map_err(|e| DriftguardError::ValidationError(e.to_string()))?
        );
    } else {
        use colored::Colorize;
        for probe in &result.integrity {
            let marker = if probe.result == "ok" {
                "✓".bright_green()
            } else {
                "⚠".bright_yellow()
            };
            println!("  {} {}: {}", marker, probe.db, probe.result);
        }
        println!(
            "{} audit {}: {} scanned, {} missing, {} stale, {} untracked ({}ms)",
            if result.status == "ok" {
                "✓".bright_green()
            } else {
                "⚠".bright_yellow()
            },
            result.status,
            result.scanned_paths,
            result.missing_count,
            result.stale_count,
            result.untracked_count,
            result.duration_ms
        );
        for p in &result.missing_paths {
            println!("  {} missing: {}", "−".red(), p);
        }
        for s in &result.stale_paths {
            println!("  {} stale: {}", "~".yellow(), s.path);
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "audit",
        "version": "0.1.0",
        "description": "DB-to-filesystem consistency auditing with best-effort remediation hooks",
        "commands": [
            { "name": "run", "parameters": ["asset-db", "base", "pattern", "analytics", "regenerate", "reingest", "timeout-secs"] }
        ],
        "storage": ["consistency_audit_events"]
    })
}
