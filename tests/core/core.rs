use driftguard::core::db::{db_connect, integrity_probe, table_exists};
use driftguard::core::hash::{hash_file, hash_text};
use driftguard::core::walk::discover;
use tempfile::tempdir;

#[test]
fn test_db_connect_enables_wal() {
    let tmp = tempdir().unwrap();
    let conn = db_connect(&tmp.path().join("wal.db")).unwrap();
    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn test_db_connect_creates_parent_dirs() {
    let tmp = tempdir().unwrap();
    let nested = tmp.path().join("a/b/c.db");
    db_connect(&nested).unwrap();
    assert!(nested.exists());
}

#[test]
fn test_table_exists() {
    let tmp = tempdir().unwrap();
    let conn = db_connect(&tmp.path().join("t.db")).unwrap();
    assert!(!table_exists(&conn, "things").unwrap());
    conn.execute("CREATE TABLE things (id INTEGER PRIMARY KEY)", [])
        .unwrap();
    assert!(table_exists(&conn, "things").unwrap());
}

#[test]
fn test_integrity_probe_healthy_db() {
    let tmp = tempdir().unwrap();
    let conn = db_connect(&tmp.path().join("ok.db")).unwrap();
    assert_eq!(integrity_probe(&conn), "ok");
}

#[test]
fn test_hash_primitives_agree() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("f");
    std::fs::write(&path, "drift").unwrap();
    assert_eq!(hash_file(&path).unwrap(), hash_text("drift"));
}

#[test]
fn test_discover_walks_nested_roots() {
    let tmp = tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("x/y/z")).unwrap();
    std::fs::write(tmp.path().join("x/y/z/deep.har"), "{}").unwrap();
    std::fs::write(tmp.path().join("x/top.txt"), "t").unwrap();

    let found: Vec<_> = discover(&[tmp.path().to_path_buf()], &["**/*.har".to_string()])
        .unwrap()
        .collect();
    assert_eq!(found.len(), 1);
    assert!(found[0].ends_with("deep.har"));
}
