//! `rapid serve` -- HTTP JSON API for live polls.
//!
//! Security features:
//! - Staff capability via `Authorization: Bearer <key>` against `auth.staff_keys`
//! - Optional ingest key for `POST /events` (`X-API-Key` or Bearer)
//! - CORS headers on all responses
//! - Per-IP rate limiting (default: 60 req/min, configurable)
//! - Request body size limit
//!
//! Endpoints:
//! - GET  /health                                            - Server status
//! - GET  /problems/{problem}/contexts/{context}/status      - Open/enabled/staff flags
//! - POST /problems/{problem}/contexts/{context}/toggle      - Open or close a run (staff)
//! - GET  /problems/{problem}/contexts/{context}/responses   - Histogram payload (staff)
//! - POST /problems/{problem}/enabled/toggle                 - Flip enabled flag (staff)
//! - POST /events                                            - Ingest one event or an array
//!
//! All responses use Content-Type: application/json.

mod handlers;
mod middleware;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use rapid_core::{Catalog, RapidService};
use rapid_storage::RapidStorage;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use self::handlers::{
    handle_events, handle_health, handle_not_found, handle_responses, handle_status,
    handle_toggle, handle_toggle_enabled,
};
use self::middleware::{ingest_key_middleware, rate_limit_middleware};
use self::state::{AppState, RateLimiter};

/// Rate limit window duration in seconds (1 minute).
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Everything `start_server` needs besides the service.
pub(crate) struct ServeOptions {
    pub(crate) port: u16,
    pub(crate) rate_limit: u64,
    pub(crate) max_body_bytes: usize,
    pub(crate) staff_keys: Vec<String>,
    pub(crate) ingest_key: Option<String>,
    pub(crate) tls_cert: Option<PathBuf>,
    pub(crate) tls_key: Option<PathBuf>,
}

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

pub(crate) fn router<S: RapidStorage>(state: Arc<AppState<S>>, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/problems/{problem}/contexts/{context}/status",
            get(handle_status::<S>),
        )
        .route(
            "/problems/{problem}/contexts/{context}/toggle",
            post(handle_toggle::<S>),
        )
        .route(
            "/problems/{problem}/contexts/{context}/responses",
            get(handle_responses::<S>),
        )
        .route(
            "/problems/{problem}/enabled/toggle",
            post(handle_toggle_enabled::<S>),
        )
        .route("/events", post(handle_events::<S>))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            ingest_key_middleware::<S>,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware::<S>,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Start the HTTP server.
///
/// When TLS cert/key paths are provided, the server listens over HTTPS
/// using `axum-server` with rustls. Otherwise it uses plain HTTP.
pub(crate) async fn start_server<S: RapidStorage>(
    service: RapidService<S, Catalog>,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    if options.staff_keys.is_empty() {
        warn!("no staff keys configured; staff-only routes will reject every request");
    }
    if options.ingest_key.is_some() {
        info!("ingest key required for POST /events");
    }
    info!(
        rate_limit = options.rate_limit,
        "rate limit: requests per minute per IP"
    );

    let state = Arc::new(AppState {
        service,
        rate_limiter: RateLimiter::new(options.rate_limit),
        staff_keys: options.staff_keys,
        ingest_key: options.ingest_key,
    });
    let app = router(state, options.max_body_bytes);

    let port = options.port;
    let addr = format!("0.0.0.0:{}", port);

    #[cfg(feature = "tls")]
    if let (Some(cert_path), Some(key_path)) = (&options.tls_cert, &options.tls_key) {
        let config =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;
        let socket_addr: std::net::SocketAddr = addr.parse()?;
        info!(port, "rapid listening on https");
        axum_server::bind_rustls(socket_addr, config)
            .serve(app.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .await?;
        return Ok(());
    }

    #[cfg(not(feature = "tls"))]
    if options.tls_cert.is_some() {
        return Err("TLS requires building rapid with the `tls` feature".into());
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(port, "rapid listening on http");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
