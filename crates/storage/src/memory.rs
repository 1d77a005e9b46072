//! In-process `RapidStorage` backend.
//!
//! Committed state lives behind an `RwLock`; readers see only committed
//! tables. A snapshot holds the single writer lock for its whole lifetime
//! and stages its writes as a delta over the committed tables, which is
//! merged in on commit. Snapshots are therefore fully serialized, which
//! gives the single-open-run and per-participant uniqueness guarantees
//! without any further coordination, and the committed tables cannot change
//! underneath a snapshot.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StorageError;
use crate::record::{AnswerCount, NewSubmission, RunId, RunRecord, SubmissionRecord};
use crate::traits::RapidStorage;

type Scope = (String, String);

#[derive(Debug, Default)]
struct Tables {
    runs: BTreeMap<RunId, RunRecord>,
    /// Open run per (problem_id, context_id).
    open_runs: HashMap<Scope, RunId>,
    /// Submissions per run, keyed by participant.
    submissions: HashMap<RunId, HashMap<String, SubmissionRecord>>,
    problem_enabled: BTreeMap<String, bool>,
    last_run_id: RunId,
    last_submission_id: i64,
}

impl Tables {
    fn open_run(&self, problem_id: &str, context_id: &str) -> Option<&RunRecord> {
        let id = self
            .open_runs
            .get(&(problem_id.to_string(), context_id.to_string()))?;
        self.runs.get(id)
    }

    fn submission(&self, run_id: RunId, participant_id: &str) -> Option<&SubmissionRecord> {
        self.submissions.get(&run_id)?.get(participant_id)
    }

    fn apply(&mut self, delta: Delta) {
        // Ascending id order: a closed run is unindexed before any run that
        // replaced it within the same snapshot is indexed.
        for (id, run) in delta.runs {
            let scope = (run.problem_id.clone(), run.context_id.clone());
            if run.open {
                self.open_runs.insert(scope, id);
            } else if self.open_runs.get(&scope) == Some(&id) {
                self.open_runs.remove(&scope);
            }
            self.runs.insert(id, run);
        }
        for ((run_id, participant_id), row) in delta.submissions {
            self.submissions
                .entry(run_id)
                .or_default()
                .insert(participant_id, row);
        }
        self.problem_enabled.extend(delta.problem_enabled);
        self.last_run_id = delta.last_run_id;
        self.last_submission_id = delta.last_submission_id;
    }
}

/// Writes staged by one snapshot.
#[derive(Debug, Default)]
struct Delta {
    /// New runs and committed runs this snapshot closed, as they will be.
    runs: BTreeMap<RunId, RunRecord>,
    submissions: BTreeMap<(RunId, String), SubmissionRecord>,
    problem_enabled: BTreeMap<String, bool>,
    last_run_id: RunId,
    last_submission_id: i64,
}

/// Volatile storage for tests, demos, and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    committed: Arc<RwLock<Tables>>,
    writer: Arc<Mutex<()>>,
}

/// An in-progress `MemoryStorage` transaction.
///
/// Dropping it without committing discards the staged delta, which is the
/// rollback.
pub struct MemorySnapshot {
    _writer: OwnedMutexGuard<()>,
    committed: Arc<RwLock<Tables>>,
    staged: Delta,
}

impl MemorySnapshot {
    fn tables(&self) -> Result<RwLockReadGuard<'_, Tables>, StorageError> {
        self.committed.read().map_err(poisoned)
    }

    fn run(&self, run_id: RunId) -> Result<RunRecord, StorageError> {
        if let Some(run) = self.staged.runs.get(&run_id) {
            return Ok(run.clone());
        }
        self.tables()?
            .runs
            .get(&run_id)
            .cloned()
            .ok_or(StorageError::RunNotFound { run_id })
    }

    fn open_run(
        &self,
        problem_id: &str,
        context_id: &str,
    ) -> Result<Option<RunRecord>, StorageError> {
        let staged = self
            .staged
            .runs
            .values()
            .find(|r| r.open && r.problem_id == problem_id && r.context_id == context_id);
        if let Some(run) = staged {
            return Ok(Some(run.clone()));
        }
        let tables = self.tables()?;
        let committed = tables
            .open_run(problem_id, context_id)
            .filter(|run| !self.staged.runs.contains_key(&run.id))
            .cloned();
        Ok(committed)
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Backend(format!("lock poisoned: {e}"))
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_committed<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StorageError> {
        let tables = self.committed.read().map_err(poisoned)?;
        Ok(f(&tables))
    }
}

#[async_trait]
impl RapidStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        let writer = self.writer.clone().lock_owned().await;
        let (last_run_id, last_submission_id) =
            self.read_committed(|t| (t.last_run_id, t.last_submission_id))?;
        Ok(MemorySnapshot {
            _writer: writer,
            committed: Arc::clone(&self.committed),
            staged: Delta {
                last_run_id,
                last_submission_id,
                ..Delta::default()
            },
        })
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let MemorySnapshot {
            _writer, staged, ..
        } = snapshot;
        let mut committed = self.committed.write().map_err(poisoned)?;
        committed.apply(staged);
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    async fn find_open_run_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        problem_id: &str,
        context_id: &str,
    ) -> Result<Option<RunRecord>, StorageError> {
        snapshot.open_run(problem_id, context_id)
    }

    async fn insert_open_run(
        &self,
        snapshot: &mut MemorySnapshot,
        problem_id: &str,
        context_id: &str,
        created_at: &str,
    ) -> Result<RunRecord, StorageError> {
        if snapshot.open_run(problem_id, context_id)?.is_some() {
            return Err(StorageError::OpenRunExists {
                problem_id: problem_id.to_string(),
                context_id: context_id.to_string(),
            });
        }
        let staged = &mut snapshot.staged;
        staged.last_run_id += 1;
        let run = RunRecord {
            id: staged.last_run_id,
            problem_id: problem_id.to_string(),
            context_id: context_id.to_string(),
            created_at: created_at.to_string(),
            open: true,
        };
        staged.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn close_run(
        &self,
        snapshot: &mut MemorySnapshot,
        run_id: RunId,
    ) -> Result<RunRecord, StorageError> {
        let mut run = snapshot.run(run_id)?;
        if !run.open {
            return Err(StorageError::RunAlreadyClosed { run_id });
        }
        run.open = false;
        snapshot.staged.runs.insert(run_id, run.clone());
        Ok(run)
    }

    async fn upsert_submission(
        &self,
        snapshot: &mut MemorySnapshot,
        submission: NewSubmission,
    ) -> Result<SubmissionRecord, StorageError> {
        let run_id = submission.run_id;
        if !snapshot.run(run_id)?.open {
            return Err(StorageError::RunAlreadyClosed { run_id });
        }

        let key = (run_id, submission.participant_id);
        let existing_id = match snapshot.staged.submissions.get(&key) {
            Some(row) => Some(row.id),
            None => snapshot
                .tables()?
                .submission(run_id, &key.1)
                .map(|row| row.id),
        };
        let id = match existing_id {
            Some(id) => id,
            None => {
                snapshot.staged.last_submission_id += 1;
                snapshot.staged.last_submission_id
            }
        };
        let row = SubmissionRecord {
            id,
            run_id,
            participant_id: key.1.clone(),
            answer_id: submission.answer_id,
            answer_text: submission.answer_text,
            event: submission.event,
            created_at: submission.created_at,
        };
        snapshot.staged.submissions.insert(key, row.clone());
        Ok(row)
    }

    async fn get_problem_enabled_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        problem_id: &str,
    ) -> Result<Option<bool>, StorageError> {
        if let Some(enabled) = snapshot.staged.problem_enabled.get(problem_id) {
            return Ok(Some(*enabled));
        }
        let tables = snapshot.tables()?;
        let enabled = tables.problem_enabled.get(problem_id).copied();
        Ok(enabled)
    }

    async fn set_problem_enabled(
        &self,
        snapshot: &mut MemorySnapshot,
        problem_id: &str,
        enabled: bool,
        _updated_at: &str,
    ) -> Result<(), StorageError> {
        snapshot
            .staged
            .problem_enabled
            .insert(problem_id.to_string(), enabled);
        Ok(())
    }

    async fn get_open_run(
        &self,
        problem_id: &str,
        context_id: &str,
    ) -> Result<Option<RunRecord>, StorageError> {
        self.read_committed(|t| t.open_run(problem_id, context_id).cloned())
    }

    async fn list_runs(
        &self,
        problem_id: &str,
        context_id: &str,
    ) -> Result<Vec<RunRecord>, StorageError> {
        self.read_committed(|t| {
            t.runs
                .values()
                .rev()
                .filter(|r| r.problem_id == problem_id && r.context_id == context_id)
                .cloned()
                .collect()
        })
    }

    async fn get_submission(
        &self,
        run_id: RunId,
        participant_id: &str,
    ) -> Result<Option<SubmissionRecord>, StorageError> {
        self.read_committed(|t| t.submission(run_id, participant_id).cloned())
    }

    async fn list_submissions(&self, run_id: RunId) -> Result<Vec<SubmissionRecord>, StorageError> {
        self.read_committed(|t| {
            let mut rows: Vec<SubmissionRecord> = t
                .submissions
                .get(&run_id)
                .map(|per_run| per_run.values().cloned().collect())
                .unwrap_or_default();
            rows.sort_by_key(|s| s.id);
            rows
        })
    }

    async fn count_answers(&self, run_ids: &[RunId]) -> Result<Vec<AnswerCount>, StorageError> {
        let wanted: BTreeSet<RunId> = run_ids.iter().copied().collect();
        self.read_committed(|t| {
            let mut counts = Vec::new();
            for run_id in wanted {
                let Some(per_run) = t.submissions.get(&run_id) else {
                    continue;
                };
                let mut grouped: BTreeMap<&str, u64> = BTreeMap::new();
                for s in per_run.values() {
                    *grouped.entry(s.answer_id.as_str()).or_insert(0) += 1;
                }
                counts.extend(grouped.into_iter().map(|(answer_id, count)| AnswerCount {
                    run_id,
                    answer_id: answer_id.to_string(),
                    count,
                }));
            }
            counts
        })
    }

    async fn get_problem_enabled(&self, problem_id: &str) -> Result<Option<bool>, StorageError> {
        self.read_committed(|t| t.problem_enabled.get(problem_id).copied())
    }
}
