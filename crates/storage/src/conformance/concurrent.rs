use std::future::Future;
use std::sync::Arc;

use super::{make_submission, open_run, ts, TestResult, CONTEXT, PROBLEM};
use crate::{RapidStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_open_exactly_one_wins",
        concurrent_open_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_upserts_same_participant_leave_one_row",
        concurrent_upserts_same_participant_leave_one_row(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_upserts_different_participants_all_recorded",
        concurrent_upserts_different_participants_all_recorded(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "close_racing_submissions_stays_consistent",
        close_racing_submissions_stays_consistent(factory).await,
    ));

    results
}

// ── Concurrent find-or-create: exactly one creates ──────────────────────────

/// N tasks each open a snapshot, look for an open run, and create one if
/// none exists. Exactly one task may create; the rest must either observe
/// the winner's run or be rejected by the open-run constraint.
async fn concurrent_open_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            if s.find_open_run_for_update(&mut snap, PROBLEM, CONTEXT)
                .await?
                .is_some()
            {
                s.abort_snapshot(snap).await?;
                return Ok(false);
            }
            match s
                .insert_open_run(&mut snap, PROBLEM, CONTEXT, &ts(i as u32))
                .await
            {
                Ok(_) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::OpenRunExists { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 creator, got {winners}"));
    }
    let runs = storage
        .list_runs(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("list_runs: {e}"))?;
    let open = runs.iter().filter(|r| r.open).count();
    if runs.len() != 1 || open != 1 {
        return Err(format!("expected 1 open run, got {runs:?}"));
    }
    Ok(())
}

// ── Concurrent upserts for one participant: one surviving row ───────────────

async fn concurrent_upserts_same_participant_leave_one_row<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let run_id = open_run(storage.as_ref(), PROBLEM, CONTEXT, &ts(0)).await?.id;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let answer = format!("choice_{i}");
            match s
                .upsert_submission(&mut snap, make_submission(run_id, "p1", &answer))
                .await
            {
                Ok(_) => s.commit_snapshot(snap).await,
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
    }

    let rows = storage
        .list_submissions(run_id)
        .await
        .map_err(|e| format!("list_submissions: {e}"))?;
    if rows.len() != 1 {
        return Err(format!("expected 1 surviving row, got {}", rows.len()));
    }
    let written: Vec<String> = (0..N).map(|i| format!("choice_{i}")).collect();
    if !written.contains(&rows[0].answer_id) {
        return Err(format!("surviving answer was never written: {:?}", rows[0]));
    }
    Ok(())
}

// ── Concurrent upserts for distinct participants: all recorded ──────────────

async fn concurrent_upserts_different_participants_all_recorded<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let run_id = open_run(storage.as_ref(), PROBLEM, CONTEXT, &ts(0)).await?.id;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let participant = format!("p{i}");
            match s
                .upsert_submission(&mut snap, make_submission(run_id, &participant, "choice_0"))
                .await
            {
                Ok(_) => s.commit_snapshot(snap).await,
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
    }

    let counts = storage
        .count_answers(&[run_id])
        .await
        .map_err(|e| format!("count_answers: {e}"))?;
    if counts.len() != 1 || counts[0].count != N as u64 {
        return Err(format!("expected {N} choice_0 submissions, got {counts:?}"));
    }
    Ok(())
}

// ── Close racing submissions: no write lands after the close ────────────────

/// Submissions racing a close either commit before it (and are kept) or are
/// rejected with `RunAlreadyClosed`. The stored rows must match the
/// successful writes exactly.
async fn close_racing_submissions_stays_consistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let run_id = open_run(storage.as_ref(), PROBLEM, CONTEXT, &ts(0)).await?.id;

    let closer = {
        let s = storage.clone();
        tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            s.close_run(&mut snap, run_id).await?;
            s.commit_snapshot(snap).await
        })
    };

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let participant = format!("p{i}");
            match s
                .upsert_submission(&mut snap, make_submission(run_id, &participant, "choice_0"))
                .await
            {
                Ok(_) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::RunAlreadyClosed { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    closer
        .await
        .map_err(|e| format!("task panic: {e}"))?
        .map_err(|e| format!("close failed: {e}"))?;
    let mut accepted = 0usize;
    for handle in handles {
        let ok = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if ok {
            accepted += 1;
        }
    }

    let rows = storage
        .list_submissions(run_id)
        .await
        .map_err(|e| format!("list_submissions: {e}"))?;
    if rows.len() != accepted {
        return Err(format!(
            "{accepted} submissions committed but {} rows stored",
            rows.len()
        ));
    }
    Ok(())
}
