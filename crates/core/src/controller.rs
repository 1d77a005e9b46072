use std::sync::Arc;

use rapid_storage::{RapidStorage, RunRecord, StorageError};
use tracing::{info, warn};

use crate::clock::now_rfc3339;
use crate::ids::{ContextId, ProblemId};

/// How many times a toggle unit is attempted before a transient conflict
/// is returned to the caller.
pub const TOGGLE_ATTEMPTS: usize = 3;

/// Opens and closes runs.
///
/// `toggle` is the only transition of the run state machine: it creates a
/// new open run when none is open, and otherwise closes the open one. The
/// find and the write happen in one snapshot, and the store rejects a
/// second open run, so racing toggles cannot leave two runs open. A toggle
/// that loses the race is retried and then observes the winner's run.
pub struct RunController<S> {
    storage: Arc<S>,
    attempts: usize,
}

impl<S> Clone for RunController<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            attempts: self.attempts,
        }
    }
}

impl<S: RapidStorage> RunController<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            attempts: TOGGLE_ATTEMPTS,
        }
    }

    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Flip the open/closed state for (problem, context) and return the
    /// affected run in its new state.
    pub async fn toggle(
        &self,
        problem: &ProblemId,
        context: &ContextId,
    ) -> Result<RunRecord, StorageError> {
        let mut attempt = 1;
        loop {
            match self.toggle_once(problem, context).await {
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!(
                        problem = %problem,
                        context = %context,
                        attempt,
                        error = %e,
                        "toggle conflicted, retrying"
                    );
                    attempt += 1;
                }
                Ok(run) => {
                    info!(
                        problem = %problem,
                        context = %context,
                        run_id = run.id,
                        open = run.open,
                        "toggled run"
                    );
                    return Ok(run);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn toggle_once(
        &self,
        problem: &ProblemId,
        context: &ContextId,
    ) -> Result<RunRecord, StorageError> {
        let storage = &self.storage;
        let mut snapshot = storage.begin_snapshot().await?;

        let flipped = match storage
            .find_open_run_for_update(&mut snapshot, problem.as_str(), context.as_str())
            .await
        {
            Ok(Some(open)) => storage.close_run(&mut snapshot, open.id).await,
            Ok(None) => {
                storage
                    .insert_open_run(
                        &mut snapshot,
                        problem.as_str(),
                        context.as_str(),
                        &now_rfc3339(),
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        match flipped {
            Ok(run) => {
                storage.commit_snapshot(snapshot).await?;
                Ok(run)
            }
            Err(e) => {
                let _ = storage.abort_snapshot(snapshot).await;
                Err(e)
            }
        }
    }
}
