use std::future::Future;

use super::{close_run, open_run, ts, TestResult, CONTEXT, PROBLEM};
use crate::{RapidStorage, StorageError};

pub(super) async fn run_run_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "runs",
        "insert_open_run_creates_open_run",
        insert_open_run_creates_open_run(factory).await,
    ));
    results.push(TestResult::from_result(
        "runs",
        "open_run_readable_via_get_open_run",
        open_run_readable_via_get_open_run(factory).await,
    ));
    results.push(TestResult::from_result(
        "runs",
        "open_run_readable_via_find_open_run_for_update",
        open_run_readable_via_find_open_run_for_update(factory).await,
    ));
    results.push(TestResult::from_result(
        "runs",
        "second_open_run_rejected",
        second_open_run_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "runs",
        "close_run_flips_open_flag",
        close_run_flips_open_flag(factory).await,
    ));
    results.push(TestResult::from_result(
        "runs",
        "new_run_after_close_gets_new_id",
        new_run_after_close_gets_new_id(factory).await,
    ));
    results.push(TestResult::from_result(
        "runs",
        "list_runs_newest_first",
        list_runs_newest_first(factory).await,
    ));
    results.push(TestResult::from_result(
        "runs",
        "list_runs_breaks_timestamp_ties_by_id",
        list_runs_breaks_timestamp_ties_by_id(factory).await,
    ));
    results.push(TestResult::from_result(
        "runs",
        "list_runs_ignores_clock_going_backwards",
        list_runs_ignores_clock_going_backwards(factory).await,
    ));
    results.push(TestResult::from_result(
        "runs",
        "runs_scoped_to_problem_and_context",
        runs_scoped_to_problem_and_context(factory).await,
    ));
    results.push(TestResult::from_result(
        "runs",
        "no_runs_yields_empty_list",
        no_runs_yields_empty_list(factory).await,
    ));

    results
}

async fn insert_open_run_creates_open_run<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let run = open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;

    if !run.open {
        return Err("new run should be open".to_string());
    }
    if run.problem_id != PROBLEM || run.context_id != CONTEXT {
        return Err(format!(
            "run keyed on {}/{}, expected {PROBLEM}/{CONTEXT}",
            run.problem_id, run.context_id
        ));
    }
    if run.created_at != ts(0) {
        return Err(format!("created_at {} != {}", run.created_at, ts(0)));
    }
    Ok(())
}

async fn open_run_readable_via_get_open_run<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let run = open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;

    let found = storage
        .get_open_run(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("get_open_run: {e}"))?
        .ok_or("open run not found after commit")?;
    if found != run {
        return Err(format!("read {found:?}, inserted {run:?}"));
    }
    Ok(())
}

async fn open_run_readable_via_find_open_run_for_update<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
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
    let found = storage
        .find_open_run_for_update(&mut snap, PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("find_open_run_for_update: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    match found {
        Some(found) if found.id == run.id => Ok(()),
        other => Err(format!("expected run {}, got {other:?}", run.id)),
    }
}

async fn second_open_run_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let result = storage
        .insert_open_run(&mut snap, PROBLEM, CONTEXT, &ts(1))
        .await;
    let _ = storage.abort_snapshot(snap).await;

    match result {
        Err(StorageError::OpenRunExists {
            problem_id,
            context_id,
        }) => {
            if problem_id != PROBLEM || context_id != CONTEXT {
                return Err(format!(
                    "OpenRunExists names {problem_id}/{context_id}, expected {PROBLEM}/{CONTEXT}"
                ));
            }
            Ok(())
        }
        Ok(run) => Err(format!("second open run was created: {run:?}")),
        Err(e) => Err(format!("expected OpenRunExists, got {e}")),
    }
}

async fn close_run_flips_open_flag<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let run = open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;
    let closed = close_run(&storage, run.id).await?;

    if closed.open || closed.id != run.id {
        return Err(format!("close_run returned {closed:?}"));
    }
    let open = storage
        .get_open_run(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("get_open_run: {e}"))?;
    if open.is_some() {
        return Err(format!("run still open after close: {open:?}"));
    }
    let runs = storage
        .list_runs(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("list_runs: {e}"))?;
    if runs.len() != 1 || runs[0].open {
        return Err(format!("expected one closed run, got {runs:?}"));
    }
    Ok(())
}

async fn new_run_after_close_gets_new_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let first = open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;
    close_run(&storage, first.id).await?;
    let second = open_run(&storage, PROBLEM, CONTEXT, &ts(1)).await?;

    if second.id <= first.id {
        return Err(format!(
            "run ids must increase: first {}, second {}",
            first.id, second.id
        ));
    }
    if !second.open {
        return Err("second run should be open".to_string());
    }
    Ok(())
}

async fn list_runs_newest_first<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut ids = Vec::new();
    for i in 0..3 {
        let run = open_run(&storage, PROBLEM, CONTEXT, &ts(i)).await?;
        close_run(&storage, run.id).await?;
        ids.push(run.id);
    }

    let listed: Vec<i64> = storage
        .list_runs(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("list_runs: {e}"))?
        .iter()
        .map(|r| r.id)
        .collect();
    ids.reverse();
    if listed != ids {
        return Err(format!("expected {ids:?}, got {listed:?}"));
    }
    Ok(())
}

async fn list_runs_breaks_timestamp_ties_by_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let first = open_run(&storage, PROBLEM, CONTEXT, &ts(5)).await?;
    close_run(&storage, first.id).await?;
    let second = open_run(&storage, PROBLEM, CONTEXT, &ts(5)).await?;

    let listed: Vec<i64> = storage
        .list_runs(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("list_runs: {e}"))?
        .iter()
        .map(|r| r.id)
        .collect();
    if listed != vec![second.id, first.id] {
        return Err(format!(
            "expected [{}, {}], got {listed:?}",
            second.id, first.id
        ));
    }
    Ok(())
}

async fn list_runs_ignores_clock_going_backwards<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let first = open_run(&storage, PROBLEM, CONTEXT, &ts(10)).await?;
    close_run(&storage, first.id).await?;
    let second = open_run(&storage, PROBLEM, CONTEXT, &ts(5)).await?;

    let listed = storage
        .list_runs(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("list_runs: {e}"))?;
    let ids: Vec<i64> = listed.iter().map(|r| r.id).collect();
    if ids != vec![second.id, first.id] {
        return Err(format!(
            "expected [{}, {}], got {ids:?}",
            second.id, first.id
        ));
    }
    if !listed[0].open {
        return Err("open run should be listed first".to_string());
    }
    Ok(())
}

async fn runs_scoped_to_problem_and_context<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;
    // Same problem in another course, and another problem in the same course,
    // may each hold their own open run.
    open_run(&storage, PROBLEM, "course-v1:Org+Poll+2026", &ts(1)).await?;
    open_run(&storage, "block-v1:Org+Poll+2025+type@problem+block@q2", CONTEXT, &ts(2)).await?;

    let runs = storage
        .list_runs(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("list_runs: {e}"))?;
    if runs.len() != 1 {
        return Err(format!("expected 1 run for {PROBLEM}/{CONTEXT}, got {runs:?}"));
    }
    Ok(())
}

async fn no_runs_yields_empty_list<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let runs = storage
        .list_runs(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("list_runs: {e}"))?;
    let open = storage
        .get_open_run(PROBLEM, CONTEXT)
        .await
        .map_err(|e| format!("get_open_run: {e}"))?;
    if !runs.is_empty() || open.is_some() {
        return Err(format!("fresh store has runs: {runs:?} / {open:?}"));
    }
    Ok(())
}
