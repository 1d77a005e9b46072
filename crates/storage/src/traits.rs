use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{AnswerCount, NewSubmission, RunId, RunRecord, SubmissionRecord};

/// The storage trait for rapid response backends.
///
/// A `RapidStorage` implementation provides durable, transactional storage
/// for runs (collection windows), participant submissions, and per-problem
/// settings.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()` — start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)` — commit and consume the transaction
///    OR `abort_snapshot(snapshot)` — roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, the underlying transaction
/// MUST be rolled back. Writes made inside a snapshot are invisible to the
/// query operations until the snapshot commits.
///
/// ## Invariants
///
/// - At most one run per (problem_id, context_id) has `open = true`.
///   `insert_open_run` returns `Err(StorageError::OpenRunExists)` when the
///   constraint would be violated.
/// - At most one submission per (run_id, participant_id).
///   `upsert_submission` replaces the existing row instead of adding one.
/// - Snapshots for the same store are serializable: two snapshots that both
///   read "no open run" cannot both commit a new open run.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be used in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait RapidStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    ///
    /// Must be `Send` to allow passing across async task boundaries.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Run operations (within snapshot) ─────────────────────────────────────

    /// Find the open run for (problem_id, context_id), locking it for the
    /// rest of the snapshot.
    async fn find_open_run_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        problem_id: &str,
        context_id: &str,
    ) -> Result<Option<RunRecord>, StorageError>;

    /// Create a new run with `open = true`.
    ///
    /// Returns `Err(StorageError::OpenRunExists)` if an open run already
    /// exists for (problem_id, context_id).
    async fn insert_open_run(
        &self,
        snapshot: &mut Self::Snapshot,
        problem_id: &str,
        context_id: &str,
        created_at: &str,
    ) -> Result<RunRecord, StorageError>;

    /// Flip an open run to closed and return the updated record.
    ///
    /// Returns `Err(StorageError::RunNotFound)` for an unknown id and
    /// `Err(StorageError::RunAlreadyClosed)` if the run is not open.
    async fn close_run(
        &self,
        snapshot: &mut Self::Snapshot,
        run_id: RunId,
    ) -> Result<RunRecord, StorageError>;

    // ── Submission operations (within snapshot) ──────────────────────────────

    /// Insert or fully replace the submission for
    /// (submission.run_id, submission.participant_id).
    ///
    /// Returns `Err(StorageError::RunNotFound)` if the run does not exist and
    /// `Err(StorageError::RunAlreadyClosed)` if it is no longer open.
    async fn upsert_submission(
        &self,
        snapshot: &mut Self::Snapshot,
        submission: NewSubmission,
    ) -> Result<SubmissionRecord, StorageError>;

    // ── Problem settings (within snapshot) ───────────────────────────────────

    /// Read the persisted `enabled` flag for a problem, locking it for update.
    /// `None` if the problem has no persisted setting.
    async fn get_problem_enabled_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        problem_id: &str,
    ) -> Result<Option<bool>, StorageError>;

    /// Persist the `enabled` flag for a problem, creating the setting if absent.
    async fn set_problem_enabled(
        &self,
        snapshot: &mut Self::Snapshot,
        problem_id: &str,
        enabled: bool,
        updated_at: &str,
    ) -> Result<(), StorageError>;

    // ── Query operations (outside snapshot, against committed state) ─────────

    /// The open run for (problem_id, context_id), if any.
    async fn get_open_run(
        &self,
        problem_id: &str,
        context_id: &str,
    ) -> Result<Option<RunRecord>, StorageError>;

    /// All runs for (problem_id, context_id), newest first.
    ///
    /// Creation order is the run id, so this is id descending; `created_at`
    /// is informational and may go backwards if the wall clock does.
    async fn list_runs(
        &self,
        problem_id: &str,
        context_id: &str,
    ) -> Result<Vec<RunRecord>, StorageError>;

    /// The submission for (run_id, participant_id), if any.
    async fn get_submission(
        &self,
        run_id: RunId,
        participant_id: &str,
    ) -> Result<Option<SubmissionRecord>, StorageError>;

    /// All submissions recorded in a run, ordered by id.
    async fn list_submissions(&self, run_id: RunId) -> Result<Vec<SubmissionRecord>, StorageError>;

    /// Submission counts grouped by (run_id, answer_id) for the given runs.
    /// Pairs with no submissions are omitted.
    async fn count_answers(&self, run_ids: &[RunId]) -> Result<Vec<AnswerCount>, StorageError>;

    /// The persisted `enabled` flag for a problem, if any.
    async fn get_problem_enabled(&self, problem_id: &str) -> Result<Option<bool>, StorageError>;
}
