//! Runs the backend-agnostic `RapidStorage` conformance suite against
//! `SqliteStorage`, one fresh database file per test.

use std::sync::Mutex;

use rapid_sqlite::SqliteStorage;
use rapid_storage::conformance::run_conformance_suite;

#[tokio::test]
async fn sqlite_conformance() {
    // Keep every temp dir alive until the suite finishes.
    let dirs = Mutex::new(Vec::new());
    let report = run_conformance_suite(|| {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("rapid.db");
        dirs.lock().expect("dirs lock").push(dir);
        async move { SqliteStorage::open(path).expect("open sqlite storage") }
    })
    .await;
    assert!(report.failed == 0, "{report}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_conformance_multi_thread() {
    let dirs = Mutex::new(Vec::new());
    let report = run_conformance_suite(|| {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("rapid.db");
        dirs.lock().expect("dirs lock").push(dir);
        async move { SqliteStorage::open(path).expect("open sqlite storage") }
    })
    .await;
    assert!(report.failed == 0, "{report}");
}
