//! Per-choice, per-run histograms.
//!
//! Read-only. Every call goes to the store of record; nothing about run
//! state is cached between calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use rapid_storage::{AnswerCount, RapidStorage, RunId, RunRecord};
use serde::Serialize;

use crate::choices::{Choice, ChoiceLookup};
use crate::error::ServiceError;
use crate::ids::{ContextId, ProblemId};

/// `answer_id` → (run id as decimal string → submission count).
pub type Counts = BTreeMap<String, BTreeMap<String, u64>>;

/// A run as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub id: RunId,
    pub created: String,
    pub open: bool,
}

impl From<&RunRecord> for RunSummary {
    fn from(run: &RunRecord) -> Self {
        Self {
            id: run.id,
            created: run.created_at.clone(),
            open: run.open,
        }
    }
}

/// The responses payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponsesPayload {
    pub is_open: bool,
    /// Newest first.
    pub runs: Vec<RunSummary>,
    pub choices: Vec<Choice>,
    pub counts: Counts,
}

/// Build the zero-filled histogram.
///
/// Every (choice, run) pair is present. Counts for answer ids that are not
/// among `choices`, or for runs not in `runs`, are dropped.
pub fn build_counts(choices: &[Choice], runs: &[RunRecord], tallies: &[AnswerCount]) -> Counts {
    let mut counts: Counts = choices
        .iter()
        .map(|choice| {
            let per_run = runs.iter().map(|run| (run.id.to_string(), 0)).collect();
            (choice.answer_id.clone(), per_run)
        })
        .collect();

    for tally in tallies {
        if let Some(slot) = counts
            .get_mut(&tally.answer_id)
            .and_then(|per_run| per_run.get_mut(&tally.run_id.to_string()))
        {
            *slot += tally.count;
        }
    }
    counts
}

/// Builds [`ResponsesPayload`]s from the run store, the submission store,
/// and a [`ChoiceLookup`].
pub struct Aggregator<S, L> {
    storage: Arc<S>,
    lookup: Arc<L>,
}

impl<S, L> Clone for Aggregator<S, L> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            lookup: self.lookup.clone(),
        }
    }
}

impl<S: RapidStorage, L: ChoiceLookup> Aggregator<S, L> {
    pub fn new(storage: Arc<S>, lookup: Arc<L>) -> Self {
        Self { storage, lookup }
    }

    pub async fn responses(
        &self,
        problem: &ProblemId,
        context: &ContextId,
    ) -> Result<ResponsesPayload, ServiceError> {
        let choices = self
            .lookup
            .choices(problem)
            .ok_or_else(|| ServiceError::UnknownProblem(problem.to_string()))?;

        let runs = self
            .storage
            .list_runs(problem.as_str(), context.as_str())
            .await?;
        let run_ids: Vec<RunId> = runs.iter().map(|r| r.id).collect();
        let tallies = if run_ids.is_empty() {
            Vec::new()
        } else {
            self.storage.count_answers(&run_ids).await?
        };

        Ok(ResponsesPayload {
            is_open: runs.iter().any(|r| r.open),
            counts: build_counts(&choices, &runs, &tallies),
            runs: runs.iter().map(RunSummary::from).collect(),
            choices,
        })
    }

    /// Whether the newest run for (problem, context) is open.
    pub async fn is_open(
        &self,
        problem: &ProblemId,
        context: &ContextId,
    ) -> Result<bool, ServiceError> {
        let open = self
            .storage
            .get_open_run(problem.as_str(), context.as_str())
            .await?;
        Ok(open.is_some())
    }
}
