use driftguard::plugins::audit::{
    AssetTableSpec, AuditConfig, ConsistencyAuditor, DEFAULT_DETAILS_CAP,
};
use driftguard::plugins::ingest::{HarKind, IngestConfig, Ingestor};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const HAR_BODY: &str = r#"{"log":{"pages":[],"entries":[{"response":{"bodySize":7}}]}}"#;
const HAR_BODY_CHANGED: &str = r#"{"log":{"pages":[],"entries":[]}}"#;

fn ingest_har(db: &Path, root: &Path) {
    Ingestor::new(IngestConfig {
        db: db.to_path_buf(),
        roots: vec![root.to_path_buf()],
        checkpoint_wal: false,
    })
    .ingest(&HarKind, None)
    .unwrap();
}

fn audit_config(asset_db: &Path, base: &Path, analytics: Option<PathBuf>) -> AuditConfig {
    AuditConfig {
        asset_dbs: vec![asset_db.to_path_buf()],
        base_paths: vec![base.to_path_buf()],
        patterns: vec!["**/*.har".to_string()],
        asset_tables: AssetTableSpec::known(),
        analytics_db: analytics,
        regenerate_cmd: None,
        reingest_cmd: None,
        details_cap: DEFAULT_DETAILS_CAP,
    }
}

#[test]
fn test_audit_clean_tree_is_ok() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("a.har"), HAR_BODY).unwrap();
    let db = tmp.path().join("assets.db");
    ingest_har(&db, &root);

    let auditor = ConsistencyAuditor::new(audit_config(&db, &root, None));
    let result = auditor.run_audit(false, false, None).unwrap();

    assert_eq!(result.status, "ok");
    assert_eq!(result.missing_count, 0);
    assert_eq!(result.stale_count, 0);
    assert_eq!(result.untracked_count, 0);
    assert_eq!(result.scanned_paths, 1);
    assert_eq!(result.integrity.len(), 1);
    assert_eq!(result.integrity[0].result, "ok");
}

#[test]
fn test_audit_detects_deleted_file_as_missing() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    let file = root.join("gone.har");
    std::fs::write(&file, HAR_BODY).unwrap();
    let db = tmp.path().join("assets.db");
    ingest_har(&db, &root);
    std::fs::remove_file(&file).unwrap();

    let auditor = ConsistencyAuditor::new(audit_config(&db, &root, None));
    let result = auditor.run_audit(false, false, None).unwrap();

    assert!(result.missing_count >= 1);
    assert!(
        result
            .missing_paths
            .iter()
            .any(|p| p.ends_with("gone.har"))
    );
    assert_eq!(result.status, "drift");
}

#[test]
fn test_audit_detects_rewritten_file_as_stale() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    let file = root.join("mut.har");
    std::fs::write(&file, HAR_BODY).unwrap();
    let db = tmp.path().join("assets.db");
    ingest_har(&db, &root);
    std::fs::write(&file, HAR_BODY_CHANGED).unwrap();

    let auditor = ConsistencyAuditor::new(audit_config(&db, &root, None));
    let result = auditor.run_audit(false, false, None).unwrap();

    assert!(result.stale_count >= 1);
    let stale = &result.stale_paths[0];
    assert!(stale.path.ends_with("mut.har"));
    assert_ne!(stale.expected, stale.actual);
    assert_eq!(
        stale.actual,
        driftguard::core::hash::hash_file(&file).unwrap()
    );
}

#[test]
fn test_audit_counts_untracked_files() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("tracked.har"), HAR_BODY).unwrap();
    let db = tmp.path().join("assets.db");
    ingest_har(&db, &root);
    std::fs::write(root.join("rogue.har"), HAR_BODY_CHANGED).unwrap();

    let auditor = ConsistencyAuditor::new(audit_config(&db, &root, None));
    let result = auditor.run_audit(false, false, None).unwrap();

    assert_eq!(result.untracked_count, 1);
    assert!(
        result
            .untracked_paths
            .iter()
            .any(|p| p.ends_with("rogue.har"))
    );
    // Untracked alone is not drift.
    assert_eq!(result.status, "ok");
}

#[test]
fn test_audit_missing_asset_table_is_zero_rows() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    let db = tmp.path().join("empty.db");
    Connection::open(&db).unwrap().execute_batch("PRAGMA user_version=0;").unwrap();

    let auditor = ConsistencyAuditor::new(audit_config(&db, &root, None));
    let result = auditor.run_audit(false, false, None).unwrap();
    assert_eq!(result.missing_count, 0);
    assert_eq!(result.status, "ok");
}

#[test]
fn test_audit_unopenable_database_contributes_empty_set() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    let garbage = tmp.path().join("garbage.db");
    std::fs::write(&garbage, "definitely not a sqlite file, padded to exceed the header length ............................................................").unwrap();

    let auditor = ConsistencyAuditor::new(audit_config(&garbage, &root, None));
    let result = auditor.run_audit(false, false, None).unwrap();

    assert_eq!(result.missing_count, 0);
    assert_eq!(result.integrity.len(), 1);
    assert!(result.integrity[0].result.contains("unreadable"));
}

#[test]
fn test_audit_persists_event_row() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    let file = root.join("a.har");
    std::fs::write(&file, HAR_BODY).unwrap();
    let db = tmp.path().join("assets.db");
    let analytics = tmp.path().join("analytics.db");
    ingest_har(&db, &root);
    std::fs::remove_file(&file).unwrap();

    let auditor = ConsistencyAuditor::new(audit_config(&db, &root, Some(analytics.clone())));
    auditor.run_audit(false, false, None).unwrap();

    let conn = Connection::open(&analytics).unwrap();
    let (missing, status, details): (i64, String, String) = conn
        .query_row(
            "SELECT missing_count, status, details_json FROM consistency_audit_events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(missing, 1);
    assert_eq!(status, "drift");
    let parsed: serde_json::Value = serde_json::from_str(&details).unwrap();
    assert!(parsed["missing_paths"][0].as_str().unwrap().ends_with("a.har"));
}

#[test]
fn test_audit_regenerate_counter_tracks_command_outcome() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    let file = root.join("a.har");
    std::fs::write(&file, HAR_BODY).unwrap();
    let db = tmp.path().join("assets.db");
    ingest_har(&db, &root);
    std::fs::write(&file, HAR_BODY_CHANGED).unwrap();

    let mut config = audit_config(&db, &root, None);
    config.regenerate_cmd = Some(vec!["true".to_string()]);
    let result = ConsistencyAuditor::new(config)
        .run_audit(true, false, None)
        .unwrap();
    assert_eq!(result.regenerated_count, result.stale_count);

    // A failing command is swallowed; only the counter shows it.
    let mut config = audit_config(&db, &root, None);
    config.regenerate_cmd = Some(vec!["false".to_string()]);
    let result = ConsistencyAuditor::new(config)
        .run_audit(true, false, None)
        .unwrap();
    assert_eq!(result.regenerated_count, 0);
    assert_eq!(result.status, "drift");
}

#[test]
fn test_audit_reingest_counter_covers_missing_and_stale() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    let gone = root.join("gone.har");
    let stale = root.join("stale.har");
    std::fs::write(&gone, HAR_BODY).unwrap();
    std::fs::write(&stale, HAR_BODY).unwrap();
    let db = tmp.path().join("assets.db");
    ingest_har(&db, &root);
    std::fs::remove_file(&gone).unwrap();
    std::fs::write(&stale, HAR_BODY_CHANGED).unwrap();

    let mut config = audit_config(&db, &root, None);
    config.reingest_cmd = Some(vec!["true".to_string()]);
    let result = ConsistencyAuditor::new(config)
        .run_audit(false, true, None)
        .unwrap();
    assert_eq!(result.missing_count, 1);
    assert_eq!(result.stale_count, 1);
    assert_eq!(result.reingested_count, 2);
}

#[test]
fn test_audit_details_are_capped() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("har");
    std::fs::create_dir_all(&root).unwrap();
    for i in 0..6 {
        std::fs::write(root.join(format!("f{}.har", i)), HAR_BODY).unwrap();
    }
    let db = tmp.path().join("assets.db");
    ingest_har(&db, &root);
    for i in 0..6 {
        std::fs::remove_file(root.join(format!("f{}.har", i))).unwrap();
    }

    let mut config = audit_config(&db, &root, None);
    config.details_cap = 3;
    let result = ConsistencyAuditor::new(config)
        .run_audit(false, false, None)
        .unwrap();
    assert_eq!(result.missing_count, 6);
    assert_eq!(result.missing_paths.len(), 3);
}
