use driftguard::plugins::ingest::{HarKind, IngestConfig, Ingestor, ShellLogKind};
use rusqlite::Connection;
use std::path::Path;
use tempfile::tempdir;

const HAR_BODY: &str = r#"{"log":{"pages":[],"entries":[{"response":{"bodySize":42}}]}}"#;
const HAR_BODY_V2: &str = r#"{"log":{"pages":[],"entries":[{"response":{"bodySize":42}},{"response":{"bodySize":8}}]}}"#;

fn ingestor(db: &Path, root: &Path) -> Ingestor {
    Ingestor::new(IngestConfig {
        db: db.to_path_buf(),
        roots: vec![root.to_path_buf()],
        checkpoint_wal: false,
    })
}

fn count(db: &Path, sql: &str) -> i64 {
    let conn = Connection::open(db).unwrap();
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

#[test]
fn test_ingest_is_idempotent_on_unchanged_tree() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("a.har"), HAR_BODY).unwrap();
    std::fs::write(root.join("b.har"), HAR_BODY_V2).unwrap();
    let db = tmp.path().join("assets.db");

    let ing = ingestor(&db, &root);
    let first = ing.ingest(&HarKind, None).unwrap();
    assert_eq!(first.inserted, 2);
    assert_eq!(first.errors, 0);

    let second = ing.ingest(&HarKind, None).unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(count(&db, "SELECT COUNT(*) FROM har_entries"), 2);
}

#[test]
fn test_ingest_changed_file_appends_new_row() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    let file = root.join("a.har");
    std::fs::write(&file, HAR_BODY).unwrap();
    let db = tmp.path().join("assets.db");

    let ing = ingestor(&db, &root);
    ing.ingest(&HarKind, None).unwrap();

    std::fs::write(&file, HAR_BODY_V2).unwrap();
    let second = ing.ingest(&HarKind, None).unwrap();
    assert_eq!(second.inserted, 1);

    // History is append-only: both hashes remain under the same path.
    assert_eq!(
        count(&db, "SELECT COUNT(*) FROM har_entries WHERE path LIKE '%a.har'"),
        2
    );
    assert_eq!(
        count(&db, "SELECT COUNT(DISTINCT sha256) FROM har_entries"),
        2
    );
}

#[test]
fn test_ingest_skips_zero_byte_files() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("empty.har"), "").unwrap();
    std::fs::write(root.join("real.har"), HAR_BODY).unwrap();
    let db = tmp.path().join("assets.db");

    let result = ingestor(&db, &root).ingest(&HarKind, None).unwrap();
    assert_eq!(result.inserted, 1);
    assert_eq!(result.skipped, 1);
    assert_eq!(count(&db, "SELECT COUNT(*) FROM har_entries"), 1);
}

#[test]
fn test_ingest_partial_failure_does_not_abort_batch() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("bad.har"), "this is not json").unwrap();
    std::fs::write(root.join("good.har"), HAR_BODY).unwrap();
    let db = tmp.path().join("assets.db");

    let result = ingestor(&db, &root).ingest(&HarKind, None).unwrap();
    assert_eq!(result.errors, 1);
    assert_eq!(result.inserted, 1);
}

#[test]
fn test_ingest_logs_every_attempt() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("bad.har"), "nope").unwrap();
    std::fs::write(root.join("good.har"), HAR_BODY).unwrap();
    let db = tmp.path().join("assets.db");

    let ing = ingestor(&db, &root);
    ing.ingest(&HarKind, None).unwrap();
    ing.ingest(&HarKind, None).unwrap();

    assert_eq!(
        count(&db, "SELECT COUNT(*) FROM ingest_events WHERE status='inserted'"),
        1
    );
    assert_eq!(
        count(&db, "SELECT COUNT(*) FROM ingest_events WHERE status='duplicate'"),
        1
    );
    assert_eq!(
        count(&db, "SELECT COUNT(*) FROM ingest_events WHERE status='error'"),
        2
    );
    // Inserted events carry the row's primary key and hash.
    assert_eq!(
        count(
            &db,
            "SELECT COUNT(*) FROM ingest_events WHERE status='inserted' AND target_pk IS NOT NULL AND sha256 IS NOT NULL"
        ),
        1
    );
}

#[test]
fn test_ingest_har_metrics_recorded() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("a.har"), HAR_BODY).unwrap();
    let db = tmp.path().join("assets.db");

    ingestor(&db, &root).ingest(&HarKind, None).unwrap();

    let conn = Connection::open(&db).unwrap();
    let metrics: String = conn
        .query_row("SELECT metrics_json FROM har_entries", [], |row| row.get(0))
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&metrics).unwrap();
    assert_eq!(parsed["entries_count"], 1);
    assert_eq!(parsed["total_bytes"], 42);
}

#[test]
fn test_ingest_shell_logs_with_session_column() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("logs");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("build__session_2024-05-01T09:00.log"), "ok\n").unwrap();
    std::fs::write(root.join("plain.out"), "done\n").unwrap();
    std::fs::write(root.join("ignored.har"), "{}").unwrap();
    let db = tmp.path().join("assets.db");

    let result = ingestor(&db, &root).ingest(&ShellLogKind, None).unwrap();
    assert_eq!(result.inserted, 2);

    assert_eq!(
        count(
            &db,
            "SELECT COUNT(*) FROM shell_logs WHERE session_id='2024-05-01T09:00'"
        ),
        1
    );
    assert_eq!(
        count(&db, "SELECT COUNT(*) FROM shell_logs WHERE session_id IS NULL"),
        1
    );
}

#[test]
fn test_discover_accepts_explicit_file_list() {
    let tmp = tempdir().unwrap();
    let file = tmp.path().join("solo.har");
    std::fs::write(&file, HAR_BODY).unwrap();
    let db = tmp.path().join("assets.db");

    let ing = Ingestor::new(IngestConfig {
        db: db.clone(),
        roots: vec![file],
        checkpoint_wal: false,
    });
    let found: Vec<_> = ing.discover(&HarKind).unwrap().collect();
    assert_eq!(found.len(), 1);

    let result = ing.ingest(&HarKind, None).unwrap();
    assert_eq!(result.inserted, 1);
}
