use std::future::Future;

use super::{ts, TestResult, PROBLEM};
use crate::RapidStorage;

pub(super) async fn run_settings_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "settings",
        "unset_problem_has_no_setting",
        unset_problem_has_no_setting(factory).await,
    ));
    results.push(TestResult::from_result(
        "settings",
        "set_enabled_round_trips",
        set_enabled_round_trips(factory).await,
    ));
    results.push(TestResult::from_result(
        "settings",
        "set_enabled_overwrites",
        set_enabled_overwrites(factory).await,
    ));
    results.push(TestResult::from_result(
        "settings",
        "settings_scoped_to_problem",
        settings_scoped_to_problem(factory).await,
    ));

    results
}

async fn set_enabled<S: RapidStorage>(
    storage: &S,
    problem_id: &str,
    enabled: bool,
) -> Result<(), String> {
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .set_problem_enabled(&mut snap, problem_id, enabled, &ts(0))
        .await
        .map_err(|e| format!("set_problem_enabled: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))
}

async fn unset_problem_has_no_setting<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let value = storage
        .get_problem_enabled(PROBLEM)
        .await
        .map_err(|e| format!("get_problem_enabled: {e}"))?;
    match value {
        None => Ok(()),
        Some(v) => Err(format!("fresh store has a setting: {v}")),
    }
}

async fn set_enabled_round_trips<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    set_enabled(&storage, PROBLEM, true).await?;

    let committed = storage
        .get_problem_enabled(PROBLEM)
        .await
        .map_err(|e| format!("get_problem_enabled: {e}"))?;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let locked = storage
        .get_problem_enabled_for_update(&mut snap, PROBLEM)
        .await
        .map_err(|e| format!("get_problem_enabled_for_update: {e}"))?;
    let _ = storage.abort_snapshot(snap).await;

    if committed != Some(true) || locked != Some(true) {
        return Err(format!("expected Some(true), got {committed:?} / {locked:?}"));
    }
    Ok(())
}

async fn set_enabled_overwrites<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    set_enabled(&storage, PROBLEM, true).await?;
    set_enabled(&storage, PROBLEM, false).await?;

    let value = storage
        .get_problem_enabled(PROBLEM)
        .await
        .map_err(|e| format!("get_problem_enabled: {e}"))?;
    if value != Some(false) {
        return Err(format!("expected Some(false), got {value:?}"));
    }
    Ok(())
}

async fn settings_scoped_to_problem<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: RapidStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    set_enabled(&storage, PROBLEM, true).await?;

    let other = storage
        .get_problem_enabled("block-v1:Org+Poll+2025+type@problem+block@other")
        .await
        .map_err(|e| format!("get_problem_enabled: {e}"))?;
    if other.is_some() {
        return Err(format!("setting leaked to another problem: {other:?}"));
    }
    Ok(())
}
