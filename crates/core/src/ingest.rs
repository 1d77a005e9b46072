//! Event ingestion: parse, resolve the open run, upsert the submission.

use std::sync::Arc;

use rapid_storage::{NewSubmission, RapidStorage, RunId, StorageError, SubmissionRecord};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::clock::now_rfc3339;
use crate::event::{parse_event, AnswerEvent, SkipReason};

/// Result of ingesting one event.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Recorded {
        run_id: RunId,
        participant_id: String,
        answer_id: String,
    },
    Skipped(SkipReason),
}

impl IngestOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, IngestOutcome::Recorded { .. })
    }

    /// JSON rendering used by the HTTP and CLI surfaces.
    pub fn to_json(&self) -> Value {
        match self {
            IngestOutcome::Recorded {
                run_id,
                participant_id,
                answer_id,
            } => json!({
                "outcome": "recorded",
                "run_id": run_id,
                "participant_id": participant_id,
                "answer_id": answer_id,
            }),
            IngestOutcome::Skipped(reason) => json!({
                "outcome": "skipped",
                "reason": reason.code(),
                "detail": reason.to_string(),
            }),
        }
    }
}

/// Tally of a batch of ingestions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestSummary {
    pub recorded: usize,
    pub skipped: usize,
    pub outcomes: Vec<IngestOutcome>,
}

impl IngestSummary {
    pub fn push(&mut self, outcome: IngestOutcome) {
        if outcome.is_recorded() {
            self.recorded += 1;
        } else {
            self.skipped += 1;
        }
        self.outcomes.push(outcome);
    }

    pub fn to_json(&self) -> Value {
        json!({
            "recorded": self.recorded,
            "skipped": self.skipped,
            "outcomes": self.outcomes.iter().map(IngestOutcome::to_json).collect::<Vec<_>>(),
        })
    }
}

/// Writes answer events through to the submission store.
///
/// Each event is resolved and written inside a single snapshot. A failure at
/// any step aborts the snapshot, so no partial state survives, and is
/// reported as `Skipped`. Nothing is retried.
pub struct Ingester<S> {
    storage: Arc<S>,
}

impl<S> Clone for Ingester<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
        }
    }
}

impl<S: RapidStorage> Ingester<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    pub async fn ingest(&self, raw: &Value) -> IngestOutcome {
        let event = match parse_event(raw) {
            Ok(event) => event,
            Err(reason) => return skip(reason, raw),
        };

        match self.record(&event, raw).await {
            Ok(record) => {
                debug!(
                    run_id = record.run_id,
                    participant = %event.participant,
                    answer_id = %event.answer_id,
                    "recorded submission"
                );
                IngestOutcome::Recorded {
                    run_id: record.run_id,
                    participant_id: record.participant_id,
                    answer_id: record.answer_id,
                }
            }
            Err(reason) => {
                if let SkipReason::Storage { detail } = &reason {
                    warn!(
                        problem = %event.problem,
                        context = %event.context,
                        participant = %event.participant,
                        error = %detail,
                        "submission write failed"
                    );
                    return IngestOutcome::Skipped(reason);
                }
                debug!(
                    problem = %event.problem,
                    context = %event.context,
                    participant = %event.participant,
                    reason = %reason,
                    "skipped event"
                );
                IngestOutcome::Skipped(reason)
            }
        }
    }

    /// Ingest events one at a time, independently.
    pub async fn ingest_batch(&self, events: &[Value]) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for raw in events {
            summary.push(self.ingest(raw).await);
        }
        summary
    }

    async fn record(&self, event: &AnswerEvent, raw: &Value) -> Result<SubmissionRecord, SkipReason> {
        let storage = &self.storage;
        let mut snapshot = storage.begin_snapshot().await.map_err(storage_skip)?;

        let run = match storage
            .find_open_run_for_update(&mut snapshot, event.problem.as_str(), event.context.as_str())
            .await
        {
            Ok(Some(run)) => run,
            Ok(None) => {
                let _ = storage.abort_snapshot(snapshot).await;
                return Err(SkipReason::NoOpenRun {
                    problem: event.problem.to_string(),
                    context: event.context.to_string(),
                });
            }
            Err(e) => {
                let _ = storage.abort_snapshot(snapshot).await;
                return Err(storage_skip(e));
            }
        };

        let submission = NewSubmission {
            run_id: run.id,
            participant_id: event.participant.to_string(),
            answer_id: event.answer_id.to_string(),
            answer_text: event.answer_text.clone(),
            event: raw.clone(),
            created_at: now_rfc3339(),
        };
        let record = match storage.upsert_submission(&mut snapshot, submission).await {
            Ok(record) => record,
            Err(StorageError::RunAlreadyClosed { run_id }) => {
                let _ = storage.abort_snapshot(snapshot).await;
                return Err(SkipReason::RunClosed { run_id });
            }
            Err(e) => {
                let _ = storage.abort_snapshot(snapshot).await;
                return Err(storage_skip(e));
            }
        };

        storage
            .commit_snapshot(snapshot)
            .await
            .map_err(storage_skip)?;
        Ok(record)
    }
}

fn skip(reason: SkipReason, raw: &Value) -> IngestOutcome {
    let ids = RawIdentifiers::of(raw);
    debug!(
        reason = %reason,
        event_type = ?ids.event_type,
        problem = ?ids.problem,
        context = ?ids.context,
        participant = ?ids.participant,
        "skipped event"
    );
    IngestOutcome::Skipped(reason)
}

/// Whatever identifiers an unvalidated event carries.
#[derive(Debug, Default, PartialEq, Eq)]
struct RawIdentifiers<'a> {
    event_type: Option<&'a str>,
    problem: Option<&'a str>,
    context: Option<&'a str>,
    participant: Option<String>,
}

impl<'a> RawIdentifiers<'a> {
    fn of(raw: &'a Value) -> Self {
        let context = raw.get("context");
        let participant = match context.and_then(|c| c.get("user_id")) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Self {
            event_type: raw.get("event_type").and_then(Value::as_str),
            problem: raw
                .get("event")
                .and_then(|e| e.get("problem_id"))
                .and_then(Value::as_str),
            context: context
                .and_then(|c| c.get("course_id"))
                .and_then(Value::as_str),
            participant,
        }
    }
}

fn storage_skip(e: StorageError) -> SkipReason {
    SkipReason::Storage {
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapid_storage::MemoryStorage;
    use serde_json::json;

    const PROBLEM: &str = "block-v1:Org+Poll+2025+type@problem+block@q1";
    const CONTEXT: &str = "course-v1:Org+Poll+2025";

    fn answer(user_id: i64, answer_id: &str, text: &str) -> Value {
        json!({
            "event_type": "problem_check",
            "context": {"user_id": user_id, "course_id": CONTEXT},
            "event": {
                "problem_id": PROBLEM,
                "submission": {"q1_2_1": {"answer": text}},
                "answers": {"q1_2_1": answer_id}
            }
        })
    }

    async fn open_run(storage: &MemoryStorage) -> RunId {
        let mut snap = storage.begin_snapshot().await.unwrap();
        let run = storage
            .insert_open_run(&mut snap, PROBLEM, CONTEXT, "2025-01-01T00:00:00.000Z")
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();
        run.id
    }

    #[tokio::test]
    async fn records_into_open_run() {
        let storage = Arc::new(MemoryStorage::new());
        let run_id = open_run(&storage).await;
        let ingester = Ingester::new(storage.clone());

        let raw = answer(42, "choice_1", "right");
        let outcome = ingester.ingest(&raw).await;
        assert_eq!(
            outcome,
            IngestOutcome::Recorded {
                run_id,
                participant_id: "42".into(),
                answer_id: "choice_1".into(),
            }
        );

        let stored = storage.get_submission(run_id, "42").await.unwrap().unwrap();
        assert_eq!(stored.answer_text, "right");
        assert_eq!(stored.event, raw);
    }

    #[tokio::test]
    async fn no_open_run_is_skipped_without_writes() {
        let storage = Arc::new(MemoryStorage::new());
        let ingester = Ingester::new(storage.clone());

        let outcome = ingester.ingest(&answer(42, "choice_1", "right")).await;
        assert!(matches!(
            outcome,
            IngestOutcome::Skipped(SkipReason::NoOpenRun { .. })
        ));
        assert!(storage.list_runs(PROBLEM, CONTEXT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn last_write_wins_per_participant() {
        let storage = Arc::new(MemoryStorage::new());
        let run_id = open_run(&storage).await;
        let ingester = Ingester::new(storage.clone());

        ingester.ingest(&answer(7, "choice_0", "wrong")).await;
        ingester.ingest(&answer(7, "choice_1", "right")).await;

        let rows = storage.list_submissions(run_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].answer_id, "choice_1");
        assert_eq!(rows[0].answer_text, "right");
    }

    #[tokio::test]
    async fn identical_event_twice_is_idempotent() {
        let storage = Arc::new(MemoryStorage::new());
        let run_id = open_run(&storage).await;
        let ingester = Ingester::new(storage.clone());

        let raw = answer(7, "choice_0", "wrong");
        assert!(ingester.ingest(&raw).await.is_recorded());
        assert!(ingester.ingest(&raw).await.is_recorded());

        let rows = storage.list_submissions(run_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].answer_id, "choice_0");
        assert_eq!(rows[0].answer_text, "wrong");
    }

    #[tokio::test]
    async fn closed_run_accepts_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let run_id = open_run(&storage).await;
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage.close_run(&mut snap, run_id).await.unwrap();
        storage.commit_snapshot(snap).await.unwrap();

        let outcome = Ingester::new(storage.clone())
            .ingest(&answer(7, "choice_0", "wrong"))
            .await;
        assert!(!outcome.is_recorded());
        assert!(storage.list_submissions(run_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_counts_recorded_and_skipped() {
        let storage = Arc::new(MemoryStorage::new());
        open_run(&storage).await;
        let ingester = Ingester::new(storage);

        let events = vec![
            answer(1, "choice_0", "wrong"),
            json!({"event_type": "play_video"}),
            answer(2, "choice_1", "right"),
            json!("not an object"),
        ];
        let summary = ingester.ingest_batch(&events).await;
        assert_eq!(summary.recorded, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.outcomes.len(), 4);

        let rendered = summary.to_json();
        assert_eq!(rendered["recorded"], 2);
        assert_eq!(rendered["outcomes"][1]["outcome"], "skipped");
        assert_eq!(rendered["outcomes"][1]["reason"], "wrong_event_type");
    }

    #[tokio::test]
    async fn concurrent_events_for_one_participant_leave_one_row() {
        let storage = Arc::new(MemoryStorage::new());
        let run_id = open_run(&storage).await;
        let ingester = Ingester::new(storage.clone());

        let mut handles = Vec::new();
        for i in 0..10 {
            let ingester = ingester.clone();
            handles.push(tokio::spawn(async move {
                ingester
                    .ingest(&answer(7, &format!("choice_{i}"), "text"))
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_recorded());
        }

        assert_eq!(storage.list_submissions(run_id).await.unwrap().len(), 1);
    }

    #[test]
    fn skipped_events_expose_whatever_identifiers_they_carry() {
        let mut raw = answer(7, "choice_0", "wrong");
        raw["event"]["submission"]["q1_3_1"] = json!({"answer": "also"});
        assert_eq!(
            RawIdentifiers::of(&raw),
            RawIdentifiers {
                event_type: Some("problem_check"),
                problem: Some(PROBLEM),
                context: Some(CONTEXT),
                participant: Some("7".to_string()),
            }
        );

        let video = json!({"event_type": "play_video", "context": {"user_id": "u-1"}});
        assert_eq!(
            RawIdentifiers::of(&video),
            RawIdentifiers {
                event_type: Some("play_video"),
                participant: Some("u-1".to_string()),
                ..RawIdentifiers::default()
            }
        );
        assert_eq!(RawIdentifiers::of(&json!([1, 2])), RawIdentifiers::default());
    }
}
