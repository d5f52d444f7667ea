//! Centralized database schema definitions.
//!
//! Three families of tables:
//! 1. Ingest targets (`har_entries`, `shell_logs`): append-only,
//!    content-addressed artifact rows, plus the `ingest_events` audit table
//!    that lives beside them in the same database file.
//! 2. Analytics tables (`sync_audit_log`, `consistency_audit_events`): one
//!    row per sync decision / audit run, written best-effort.
//! 3. Domain tables synchronized by the sync engine are declared by the
//!    caller's schema map, not here.
//!
//! Every database file owns its audit/event tables; cross-database links are
//! path strings, never foreign keys.

// --- Ingest targets ---

pub const HAR_ENTRIES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS har_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL,
        sha256 TEXT,
        content_hash TEXT,
        size_bytes INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        metrics_json TEXT
    )
";
// The dedupe index is the single correctness mechanism behind idempotent
// ingestion. `content_hash` is the legacy column name; COALESCE keeps old
// rows deduplicating alongside new ones.
pub const HAR_ENTRIES_INDEX_DEDUPE: &str = "CREATE UNIQUE INDEX IF NOT EXISTS idx_har_entries_path_hash ON har_entries(path, COALESCE(sha256, content_hash))";
pub const HAR_ENTRIES_INDEX_CREATED: &str =
    "CREATE INDEX IF NOT EXISTS idx_har_entries_created ON har_entries(created_at)";

pub const SHELL_LOGS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS shell_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL,
        sha256 TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        session_id TEXT,
        created_at TEXT NOT NULL,
        metrics_json TEXT
    )
";
pub const SHELL_LOGS_INDEX_DEDUPE: &str = "CREATE UNIQUE INDEX IF NOT EXISTS idx_shell_logs_path_hash ON shell_logs(path, sha256)";
pub const SHELL_LOGS_INDEX_SESSION: &str =
    "CREATE INDEX IF NOT EXISTS idx_shell_logs_session ON shell_logs(session_id)";

pub const INGEST_EVENTS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ingest_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        occurred_at TEXT NOT NULL,
        kind TEXT NOT NULL,
        source TEXT NOT NULL,
        target_table TEXT NOT NULL,
        target_pk INTEGER,
        status TEXT NOT NULL,
        sha256 TEXT,
        metrics_json TEXT
    )
";
pub const INGEST_EVENTS_INDEX_OCCURRED: &str =
    "CREATE INDEX IF NOT EXISTS idx_ingest_events_occurred ON ingest_events(occurred_at)";

// --- Analytics ---

pub const SYNC_AUDIT_LOG_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sync_audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_db TEXT NOT NULL,
        target_db TEXT NOT NULL,
        table_name TEXT NOT NULL,
        action TEXT NOT NULL,
        row_id INTEGER NOT NULL,
        timestamp TEXT NOT NULL
    )
";
pub const SYNC_AUDIT_LOG_INDEX_TABLE: &str =
    "CREATE INDEX IF NOT EXISTS idx_sync_audit_table ON sync_audit_log(table_name)";

pub const CONSISTENCY_AUDIT_EVENTS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS consistency_audit_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at TEXT NOT NULL,
        finished_at TEXT NOT NULL,
        scanned_paths INTEGER NOT NULL,
        missing_count INTEGER NOT NULL,
        stale_count INTEGER NOT NULL,
        regenerated_count INTEGER NOT NULL,
        reingested_count INTEGER NOT NULL,
        details_json TEXT NOT NULL,
        status TEXT NOT NULL
    )
";
pub const CONSISTENCY_AUDIT_EVENTS_INDEX_STARTED: &str = "CREATE INDEX IF NOT EXISTS idx_consistency_audit_started ON consistency_audit_events(started_at)";
