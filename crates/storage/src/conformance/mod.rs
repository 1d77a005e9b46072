//! Conformance test suite for `RapidStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any `RapidStorage`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Runs**: open-run creation, closing, the single-open-run constraint,
//!   newest-first listing
//! - **Snapshot isolation**: uncommitted writes invisible, aborted writes discarded
//! - **Submissions**: per-participant-per-run uniqueness, full replacement,
//!   refusal to write into closed or unknown runs, grouped counts
//! - **Settings**: per-problem enabled flag
//! - **Error handling**: correct error variants for invalid operations
//! - **Concurrency**: racing snapshots never break either uniqueness invariant
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use rapid_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn sqlite_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_sqlite_storage()
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod error;
mod runs;
mod settings;
mod snapshot;
mod submission;

use std::fmt;
use std::future::Future;

use crate::record::{NewSubmission, RunId, RunRecord};
use crate::RapidStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "runs", "snapshot", "submission").
    pub category: String,
    /// Test name (e.g. "insert_open_run_creates_open_run").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(runs::run_run_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(submission::run_submission_tests(&factory).await);
    results.extend(settings::run_settings_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

const PROBLEM: &str = "block-v1:Org+Poll+2025+type@problem+block@q1";
const CONTEXT: &str = "course-v1:Org+Poll+2025";

/// Deterministic timestamp with `n` seconds past a fixed epoch.
fn ts(n: u32) -> String {
    format!("2025-01-01T00:{:02}:{:02}.000Z", n / 60, n % 60)
}

fn make_submission(run_id: RunId, participant_id: &str, answer_id: &str) -> NewSubmission {
    NewSubmission {
        run_id,
        participant_id: participant_id.to_string(),
        answer_id: answer_id.to_string(),
        answer_text: format!("text for {answer_id}"),
        event: serde_json::json!({"event_type": "problem_check", "answer": answer_id}),
        created_at: ts(30),
    }
}

/// Open a run for (problem, context) in its own committed snapshot.
async fn open_run<S: RapidStorage>(
    storage: &S,
    problem_id: &str,
    context_id: &str,
    created_at: &str,
) -> Result<RunRecord, String> {
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let run = storage
        .insert_open_run(&mut snap, problem_id, context_id, created_at)
        .await
        .map_err(|e| format!("insert_open_run: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    Ok(run)
}

/// Close a run in its own committed snapshot.
async fn close_run<S: RapidStorage>(storage: &S, run_id: RunId) -> Result<RunRecord, String> {
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let run = storage
        .close_run(&mut snap, run_id)
        .await
        .map_err(|e| format!("close_run: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    Ok(run)
}

/// Upsert a submission in its own committed snapshot.
async fn submit<S: RapidStorage>(
    storage: &S,
    run_id: RunId,
    participant_id: &str,
    answer_id: &str,
) -> Result<(), String> {
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .upsert_submission(&mut snap, make_submission(run_id, participant_id, answer_id))
        .await
        .map_err(|e| format!("upsert_submission: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    Ok(())
}
