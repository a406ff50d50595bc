//! Health Check Handlers
//!
//! Kubernetes-style liveness and readiness probes.
//!
//! # Endpoints
//! - `GET /health` - Basic health check
//! - `GET /health/live` - Liveness probe (is the server running?)
//! - `GET /health/ready` - Readiness probe (is the store reachable?)

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::time::Instant;

use crate::infrastructure::connection::HealthReport;
use crate::startup::AppState;

/// Server start time for uptime calculation
static SERVER_START: Lazy<Instant> = Lazy::new(Instant::now);
static SERVER_START_TIME: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

/// Initialize the server start time (call during startup)
pub fn init_server_start() {
    Lazy::force(&SERVER_START);
    Lazy::force(&SERVER_START_TIME);
}

/// Basic health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness response: the store probe plus process details
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    #[serde(flatten)]
    pub store: HealthReport,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub active_connections: usize,
}

/// Simple liveness response
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

/// Basic health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Liveness probe - checks if the server is running
pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "alive" })
}

/// Readiness probe - 200 when the store answers a ping, 503 otherwise
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.store.health_check().await;

    let status_code = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = ReadinessResponse {
        store: report,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: SERVER_START.elapsed().as_secs(),
        started_at: SERVER_START_TIME.to_rfc3339(),
        active_connections: state.hub.session_count(),
    };

    (status_code, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::connection::{ConnectionState, HealthDetails, HealthStatus};

    #[test]
    fn test_readiness_flattens_store_report() {
        let response = ReadinessResponse {
            store: HealthReport {
                status: HealthStatus::Healthy,
                latency_ms: 3,
                details: HealthDetails {
                    connection: ConnectionState::Connected,
                    host: "memory".into(),
                    port: 0,
                    db: 0,
                    memory: None,
                    error: None,
                },
            },
            version: "0.1.0",
            uptime_seconds: 5,
            started_at: "2026-01-01T00:00:00Z".into(),
            active_connections: 2,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["latencyMs"], 3);
        assert_eq!(json["details"]["connection"], "connected");
        assert_eq!(json["activeConnections"], 2);
    }
}
