//! HTTP route handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rapid_core::{ContextId, ProblemId, ServiceError};
use rapid_storage::RapidStorage;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use super::json_error;
use super::state::AppState;

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

/// GET /problems/{problem}/contexts/{context}/status
pub(crate) async fn handle_status<S: RapidStorage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path((problem, context)): Path<(String, String)>,
) -> Response {
    let caller = state.caller(&headers);
    respond(
        async {
            let (problem, context) = parse_scope(&problem, &context)?;
            state.service.status(caller, &problem, &context).await
        }
        .await,
    )
}

/// POST /problems/{problem}/contexts/{context}/toggle
pub(crate) async fn handle_toggle<S: RapidStorage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path((problem, context)): Path<(String, String)>,
) -> Response {
    let caller = state.caller(&headers);
    respond(
        async {
            caller.require_staff()?;
            let (problem, context) = parse_scope(&problem, &context)?;
            state.service.toggle_open(caller, &problem, &context).await
        }
        .await,
    )
}

/// GET /problems/{problem}/contexts/{context}/responses
pub(crate) async fn handle_responses<S: RapidStorage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path((problem, context)): Path<(String, String)>,
) -> Response {
    let caller = state.caller(&headers);
    respond(
        async {
            caller.require_staff()?;
            let (problem, context) = parse_scope(&problem, &context)?;
            state.service.responses(caller, &problem, &context).await
        }
        .await,
    )
}

/// POST /problems/{problem}/enabled/toggle
pub(crate) async fn handle_toggle_enabled<S: RapidStorage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(problem): Path<String>,
) -> Response {
    let caller = state.caller(&headers);
    respond(
        async {
            caller.require_staff()?;
            let problem = ProblemId::parse(&problem)?;
            state.service.toggle_enabled(caller, &problem).await
        }
        .await,
    )
}

/// POST /events
///
/// Accepts one event object or an array of events. Individual events that
/// fail validation are reported as skipped; only a body that is not JSON
/// at all is rejected.
pub(crate) async fn handle_events<S: RapidStorage>(
    State(state): State<Arc<AppState<S>>>,
    body: Bytes,
) -> Response {
    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return json_error(StatusCode::BAD_REQUEST, &format!("invalid JSON: {}", e))
                .into_response()
        }
    };

    let summary = match parsed {
        Value::Array(events) => state.service.ingest_batch(&events).await,
        single => state.service.ingest_batch(std::slice::from_ref(&single)).await,
    };
    debug!(
        recorded = summary.recorded,
        skipped = summary.skipped,
        "ingested events"
    );
    (StatusCode::OK, Json(summary.to_json())).into_response()
}

fn parse_scope(problem: &str, context: &str) -> Result<(ProblemId, ContextId), ServiceError> {
    Ok((ProblemId::parse(problem)?, ContextId::parse(context)?))
}

fn respond<T: Serialize>(result: Result<T, ServiceError>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => service_error(&e),
    }
}

/// Map a service error to its HTTP status.
fn service_error(e: &ServiceError) -> Response {
    let status = match e {
        ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
        ServiceError::UnknownProblem(_) => StatusCode::NOT_FOUND,
        ServiceError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
        ServiceError::Storage(inner) => {
            error!(error = %inner, "storage failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    json_error(status, &e.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapid_core::AccessError;
    use rapid_storage::StorageError;

    #[test]
    fn service_errors_map_to_statuses() {
        let cases = [
            (ServiceError::Forbidden(AccessError::StaffOnly), StatusCode::FORBIDDEN),
            (
                ServiceError::UnknownProblem("q9".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                ServiceError::InvalidIdentifier(ProblemId::parse("").unwrap_err()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::Storage(StorageError::Backend("disk full".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(service_error(&err).status(), expected, "{err}");
        }
    }
}
