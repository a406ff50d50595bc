//! Route Configuration
//!
//! Configures all HTTP routes for the API.

use axum::{
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};

use super::handlers;
use crate::infrastructure::metrics;
use crate::presentation::middleware::{
    auth_middleware, logging, rate_limit_api, rate_limit_auth, rate_limit_websocket,
};
use crate::presentation::websocket::ws_handler;
use crate::startup::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes(state.clone()))
        .merge(gateway_routes(state.clone()))
        // Health check endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        // Prometheus metrics endpoint
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(logging::track_metrics))
        .with_state(state)
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}

/// WebSocket push gateway, sliding window limited per client
fn gateway_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/gateway", get(ws_handler))
        .route_layer(middleware::from_fn_with_state(state, rate_limit_websocket))
}

/// API v1 routes (all authenticated)
fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .nest("/sessions", session_routes(state.clone()))
        .merge(metric_routes(state.clone()))
        // Runs first so the limiters key on the user
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Metric ingestion, snapshots and cache statistics
fn metric_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/metrics",
            post(handlers::metrics::ingest_metrics).get(handlers::metrics::get_snapshot),
        )
        .route("/cache/stats", get(handlers::cache::get_cache_stats))
        .route_layer(middleware::from_fn_with_state(state, rate_limit_api))
}

/// Session routes (stricter auth rate limiting)
fn session_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::session::create_session))
        .route(
            "/{session_id}",
            get(handlers::session::get_session)
                .patch(handlers::session::update_session)
                .delete(handlers::session::delete_session),
        )
        .route("/{session_id}/refresh", post(handlers::session::refresh_session))
        .route_layer(middleware::from_fn_with_state(state, rate_limit_auth))
}
