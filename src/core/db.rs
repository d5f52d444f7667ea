use crate::core::error;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

/// Busy timeout applied to every connection. Concurrent readers (dashboards)
/// must not see SQLITE_BUSY while a sync/ingest/audit write is in flight.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Threshold above which a post-batch WAL checkpoint is requested.
pub const WAL_CHECKPOINT_THRESHOLD_BYTES: u64 = 64 * 1024 * 1024;

pub fn db_connect(db_path: &Path) -> Result<Connection, error::DriftguardError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(error::DriftguardError::IoError)?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(error::DriftguardError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::DriftguardError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::DriftguardError::RusqliteError)?;
    Ok(conn)
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool, error::DriftguardError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// `PRAGMA quick_check` integrity probe. Diagnostic only: the result string is
/// `ok` for a healthy database, otherwise a description of the corruption.
pub fn integrity_probe(conn: &Connection) -> String {
    conn.query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
        .unwrap_or_else(|e| format!("quick_check failed: {}", e))
}

/// Request a truncating WAL checkpoint if the `-wal` sidecar has grown past
/// the threshold. Failures are swallowed: checkpointing is observability-only.
pub fn wal_checkpoint_if_large(conn: &Connection, db_path: &Path) {
    let mut wal_path = db_path.as_os_str().to_owned();
    wal_path.push("-wal");
    let size = std::fs::metadata(&wal_path).map(|m| m.len()).unwrap_or(0);
    if size > WAL_CHECKPOINT_THRESHOLD_BYTES {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
    }
}

// Each subsystem owns its schemas and lazy table creation; this module only
// hands out configured connections and shared probes.
