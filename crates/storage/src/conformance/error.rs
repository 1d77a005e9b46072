use std::future::Future;

use super::{close_run, make_submission, open_run, ts, TestResult, CONTEXT, PROBLEM};
use crate::{RapidStorage, StorageError};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "error",
        "close_unknown_run_returns_run_not_found",
        close_unknown_run_returns_run_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "close_closed_run_returns_already_closed",
        close_closed_run_returns_already_closed(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "upsert_into_unknown_run_returns_run_not_found",
        upsert_into_unknown_run_returns_run_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "error_messages_name_the_run",
        error_messages_name_the_run(factory).await,
    ));

    results
}

async fn close_unknown_run_returns_run_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let result = storage.close_run(&mut snap, 4242).await;
    let _ = storage.abort_snapshot(snap).await;

    match result {
        Err(StorageError::RunNotFound { run_id: 4242 }) => Ok(()),
        Err(e) => Err(format!("expected RunNotFound(4242), got {e}")),
        Ok(run) => Err(format!("closed a run that does not exist: {run:?}")),
    }
}

async fn close_closed_run_returns_already_closed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let run = open_run(&storage, PROBLEM, CONTEXT, &ts(0)).await?;
    close_run(&storage, run.id).await?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let result = storage.close_run(&mut snap, run.id).await;
    let _ = storage.abort_snapshot(snap).await;

    match result {
        Err(StorageError::RunAlreadyClosed { run_id }) if run_id == run.id => Ok(()),
        Err(e) => Err(format!("expected RunAlreadyClosed, got {e}")),
        Ok(run) => Err(format!("closed run closed twice: {run:?}")),
    }
}

async fn upsert_into_unknown_run_returns_run_not_found<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
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
    let result = storage
        .upsert_submission(&mut snap, make_submission(99, "p1", "choice_0"))
        .await;
    let _ = storage.abort_snapshot(snap).await;

    match result {
        Err(StorageError::RunNotFound { run_id: 99 }) => Ok(()),
        Err(e) => Err(format!("expected RunNotFound(99), got {e}")),
        Ok(row) => Err(format!("submission written without a run: {row:?}")),
    }
}

async fn error_messages_name_the_run<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let result = storage.close_run(&mut snap, 777).await;
    let _ = storage.abort_snapshot(snap).await;

    match result {
        Err(e) if e.to_string().contains("777") => Ok(()),
        Err(e) => Err(format!("error message does not name run 777: {e}")),
        Ok(_) => Err("closing run 777 should fail".to_string()),
    }
}
