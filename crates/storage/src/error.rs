/// All errors that can be returned by a RapidStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The single-open-run constraint rejected a new open run: another run
    /// for the same (problem, context) is already open.
    #[error("an open run already exists for {problem_id} in {context_id}")]
    OpenRunExists {
        problem_id: String,
        context_id: String,
    },

    /// Run not found — no run with the given id.
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: i64 },

    /// The run has already been closed and can no longer change or accept
    /// submissions.
    #[error("run already closed: {run_id}")]
    RunAlreadyClosed { run_id: i64 },

    /// Transient conflict with a concurrent writer (lock timeout, busy
    /// database, serialization failure). The unit of work did not apply.
    #[error("concurrent conflict: {detail}")]
    ConcurrentConflict { detail: String },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether retrying the whole unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::OpenRunExists { .. } | StorageError::ConcurrentConflict { .. }
        )
    }
}
