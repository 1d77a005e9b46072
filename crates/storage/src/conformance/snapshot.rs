use std::future::Future;

use super::{make_submission, open_run, ts, TestResult, CONTEXT, PROBLEM};
use crate::RapidStorage;

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_run_invisible",
        uncommitted_run_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "aborted_run_discarded",
        aborted_run_discarded(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "dropped_snapshot_rolls_back",
        dropped_snapshot_rolls_back(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "snapshot_sees_own_writes",
        snapshot_sees_own_writes(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_submission_invisible",
        uncommitted_submission_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "aborted_close_keeps_run_open",
        aborted_close_keeps_run_open(factory).await,
    ));

    results
}

async fn uncommitted_run_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_open_run(&mut snap, PROBLEM, CONTEXT, &ts(0))
        .await
        .map_err(|e| format!("insert_open_run: {e}"))?;

    let visible = storage
        .list_runs(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("list_runs: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    if !visible.is_empty() {
        return Err(format!("uncommitted run visible: {visible:?}"));
    }
    let after = storage
        .list_runs(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("list_runs: {e}"))?;
    if after.len() != 1 {
        return Err(format!("committed run not visible: {after:?}"));
    }
    Ok(())
}

async fn aborted_run_discarded<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_open_run(&mut snap, PROBLEM, CONTEXT, &ts(0))
        .await
        .map_err(|e| format!("insert_open_run: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    let runs = storage
        .list_runs(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("list_runs: {e}"))?;
    if !runs.is_empty() {
        return Err(format!("aborted run persisted: {runs:?}"));
    }
    Ok(())
}

async fn dropped_snapshot_rolls_back<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    {
        let mut snap = storage
            .begin_snapshot()
            .await
            .map_err(|e| format!("begin: {e}"))?;
        storage
            .insert_open_run(&mut snap, PROBLEM, CONTEXT, &ts(0))
            .await
            .map_err(|e| format!("insert_open_run: {e}"))?;
    }

    // The store must accept a new snapshot after the drop, and the dropped
    // write must not be there.
    let run = open_run(&storage, PROBLEM, CONTEXT, &ts(1)).await?;
    let runs = storage
        .list_runs(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("list_runs: {e}"))?;
    if runs.len() != 1 || runs[0].id != run.id {
        return Err(format!("expected only run {}, got {runs:?}", run.id));
    }
    Ok(())
}

async fn snapshot_sees_own_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let run = storage
        .insert_open_run(&mut snap, PROBLEM, CONTEXT, &ts(0))
        .await
        .map_err(|e| format!("insert_open_run: {e}"))?;
    let found = storage
        .find_open_run_for_update(&mut snap, PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("find_open_run_for_update: {e}"))?;
    storage
        .upsert_submission(&mut snap, make_submission(run.id, "p1", "choice_0"))
        .await
        .map_err(|e| format!("upsert_submission into uncommitted run: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    match found {
        Some(found) if found.id == run.id => Ok(()),
        other => Err(format!("snapshot did not see its own run: {other:?}")),
    }
}

async fn uncommitted_submission_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
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
    storage
        .upsert_submission(&mut snap, make_submission(run.id, "p1", "choice_0"))
        .await
        .map_err(|e| format!("upsert_submission: {e}"))?;
    let before = storage
        .get_submission(run.id, "p1")
        .await
        .map_err(|e| format!("get_submission: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;
    let after = storage
        .get_submission(run.id, "p1")
        .await
        .map_err(|e| format!("get_submission: {e}"))?;

    if before.is_some() {
        return Err("uncommitted submission visible".to_string());
    }
    if after.is_some() {
        return Err("aborted submission persisted".to_string());
    }
    Ok(())
}

async fn aborted_close_keeps_run_open<S, F, Fut>(factory: &F) -> Result<(), String>
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
    storage
        .close_run(&mut snap, run.id)
        .await
        .map_err(|e| format!("close_run: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    let open = storage
        .get_open_run(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("get_open_run: {e}"))?;
    match open {
        Some(open) if open.id == run.id => Ok(()),
        other => Err(format!("run should still be open, got {other:?}")),
    }
}
