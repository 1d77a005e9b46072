use std::future::Future;

use super::{close_run, make_submission, open_run, submit, ts, TestResult, CONTEXT, PROBLEM};
use crate::{AnswerCount, RapidStorage, StorageError};

pub(super) async fn run_submission_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "submission",
        "upsert_creates_submission",
        upsert_creates_submission(factory).await,
    ));
    results.push(TestResult::from_result(
        "submission",
        "upsert_replaces_previous_answer",
        upsert_replaces_previous_answer(factory).await,
    ));
    results.push(TestResult::from_result(
        "submission",
        "identical_upsert_keeps_single_row",
        identical_upsert_keeps_single_row(factory).await,
    ));
    results.push(TestResult::from_result(
        "submission",
        "participants_recorded_independently",
        participants_recorded_independently(factory).await,
    ));
    results.push(TestResult::from_result(
        "submission",
        "same_participant_in_two_runs",
        same_participant_in_two_runs(factory).await,
    ));
    results.push(TestResult::from_result(
        "submission",
        "event_payload_preserved_verbatim",
        event_payload_preserved_verbatim(factory).await,
    ));
    results.push(TestResult::from_result(
        "submission",
        "count_answers_groups_by_run_and_answer",
        count_answers_groups_by_run_and_answer(factory).await,
    ));
    results.push(TestResult::from_result(
        "submission",
        "count_answers_ignores_unlisted_runs",
        count_answers_ignores_unlisted_runs(factory).await,
    ));
    results.push(TestResult::from_result(
        "submission",
        "closed_run_keeps_its_submissions",
        closed_run_keeps_its_submissions(factory).await,
    ));

    results
}

async fn upsert_creates_submission<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let run = open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let written = storage
        .upsert_submission(&mut snap, make_submission(run.id, "p1", "choice_1"))
        .await
        .map_err(|e| format!("upsert_submission: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let read = storage
        .get_submission(run.id, "p1")
        .await
        .map_err(|e| format!("get_submission: {e}"))?
        .ok_or("submission not found after commit")?;
    if read != written {
        return Err(format!("read {read:?}, wrote {written:?}"));
    }
    if read.answer_id != "choice_1" || read.answer_text != "text for choice_1" {
        return Err(format!("wrong answer stored: {read:?}"));
    }
    Ok(())
}

async fn upsert_replaces_previous_answer<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let run = open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;
    submit(&storage, run.id, "p1", "choice_0").await?;
    submit(&storage, run.id, "p1", "choice_1").await?;

    let rows = storage
        .list_submissions(run.id)
        .await
        .map_err(|e| format!("list_submissions: {e}"))?;
    if rows.len() != 1 {
        return Err(format!("expected 1 row, got {}", rows.len()));
    }
    if rows[0].answer_id != "choice_1" || rows[0].answer_text != "text for choice_1" {
        return Err(format!("last write did not win: {:?}", rows[0]));
    }
    Ok(())
}

async fn identical_upsert_keeps_single_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let run = open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;
    submit(&storage, run.id, "p1", "choice_0").await?;
    submit(&storage, run.id, "p1", "choice_0").await?;

    let rows = storage
        .list_submissions(run.id)
        .await
        .map_err(|e| format!("list_submissions: {e}"))?;
    if rows.len() != 1 || rows[0].answer_id != "choice_0" {
        return Err(format!("expected one choice_0 row, got {rows:?}"));
    }
    Ok(())
}

async fn participants_recorded_independently<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let run = open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;
    submit(&storage, run.id, "p1", "choice_0").await?;
    submit(&storage, run.id, "p2", "choice_0").await?;
    submit(&storage, run.id, "p3", "choice_1").await?;

    let rows = storage
        .list_submissions(run.id)
        .await
        .map_err(|e| format!("list_submissions: {e}"))?;
    if rows.len() != 3 {
        return Err(format!("expected 3 rows, got {}", rows.len()));
    }
    Ok(())
}

async fn same_participant_in_two_runs<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let first = open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;
    submit(&storage, first.id, "p1", "choice_0").await?;
    close_run(&storage, first.id).await?;
    let second = open_run(&storage, PROBLEM, CONTEXT, &ts(1)).await?;
    submit(&storage, second.id, "p1", "choice_1").await?;

    let a = storage
        .get_submission(first.id, "p1")
        .await
        .map_err(|e| format!("get_submission: {e}"))?
        .ok_or("first-run submission missing")?;
    let b = storage
        .get_submission(second.id, "p1")
        .await
        .map_err(|e| format!("get_submission: {e}"))?
        .ok_or("second-run submission missing")?;
    if a.answer_id != "choice_0" || b.answer_id != "choice_1" {
        return Err(format!("runs bled into each other: {a:?} / {b:?}"));
    }
    Ok(())
}

async fn event_payload_preserved_verbatim<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let run = open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;
    let event = serde_json::json!({
        "event_type": "problem_check",
        "context": {"user_id": 7, "course_id": CONTEXT},
        "event": {"submission": {"q_2_1": {"answer": "ünïcødé \"quoted\""}}, "nested": [1, 2.5, null]},
    });
    let mut submission = make_submission(run.id, "p1", "choice_0");
    submission.event = event.clone();

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .upsert_submission(&mut snap, submission)
        .await
        .map_err(|e| format!("upsert_submission: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let read = storage
        .get_submission(run.id, "p1")
        .await
        .map_err(|e| format!("get_submission: {e}"))?
        .ok_or("submission not found")?;
    if read.event != event {
        return Err(format!("event changed in storage: {}", read.event));
    }
    Ok(())
}

async fn count_answers_groups_by_run_and_answer<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let first = open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;
    for p in ["p1", "p2", "p3"] {
        submit(&storage, first.id, p, "choice_0").await?;
    }
    close_run(&storage, first.id).await?;
    let second = open_run(&storage, PROBLEM, CONTEXT, &ts(1)).await?;
    submit(&storage, second.id, "p1", "choice_1").await?;
    submit(&storage, second.id, "p2", "choice_stale").await?;

    let mut counts = storage
        .count_answers(&[first.id, second.id])
        .await
        .map_err(|e| format!("count_answers: {e}"))?;
    counts.sort_by(|a, b| (a.run_id, &a.answer_id).cmp(&(b.run_id, &b.answer_id)));

    let expected = vec![
        AnswerCount {
            run_id: first.id,
            answer_id: "choice_0".to_string(),
            count: 3,
        },
        AnswerCount {
            run_id: second.id,
            answer_id: "choice_1".to_string(),
            count: 1,
        },
        AnswerCount {
            run_id: second.id,
            answer_id: "choice_stale".to_string(),
            count: 1,
        },
    ];
    if counts != expected {
        return Err(format!("expected {expected:?}, got {counts:?}"));
    }
    Ok(())
}

async fn count_answers_ignores_unlisted_runs<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let run = open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;
    submit(&storage, run.id, "p1", "choice_0").await?;

    let none = storage
        .count_answers(&[])
        .await
        .map_err(|e| format!("count_answers: {e}"))?;
    let other = storage
        .count_answers(&[run.id + 1000])
        .await
        .map_err(|e| format!("count_answers: {e}"))?;
    if !none.is_empty() || !other.is_empty() {
        return Err(format!("unexpected counts: {none:?} / {other:?}"));
    }
    Ok(())
}

async fn closed_run_keeps_its_submissions<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let run = open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;
    submit(&storage, run.id, "p1", "choice_0").await?;
    close_run(&storage, run.id).await?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let late = storage
        .upsert_submission(&mut snap, make_submission(run.id, "p1", "choice_1"))
        .await;
    let _ = storage.abort_snapshot(snap).await;
    match late {
        Err(StorageError::RunAlreadyClosed { run_id }) if run_id == run.id => {}
        Err(e) => return Err(format!("expected RunAlreadyClosed, got {e}")),
        Ok(row) => return Err(format!("write into closed run accepted: {row:?}")),
    }

    let kept = storage
        .get_submission(run.id, "p1")
        .await
        .map_err(|e| format!("get_submission: {e}"))?
        .ok_or("closed run lost its submission")?;
    if kept.answer_id != "choice_0" {
        return Err(format!("closed run submission changed: {kept:?}"));
    }
    Ok(())
}
