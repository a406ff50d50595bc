//! Prometheus Metrics Module
//!
//! Provides application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - HTTP request counts by method, path, and status
//! - HTTP request latency histograms
//! - Cache hits and misses by namespace
//! - Rate limit decisions by algorithm and outcome
//! - Pub/sub messages published, dispatched and failed
//! - Active push gateway sessions

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "adpulse";

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// HTTP request counter - tracks total requests by method, path, and status code
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests").namespace(NAMESPACE),
        &["method", "path", "status"],
    )
    .expect("Failed to create HTTP_REQUESTS_TOTAL metric")
});

/// HTTP request latency histogram - tracks request duration in seconds
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        )
        .namespace(NAMESPACE)
        .buckets(buckets),
        &["method", "path"],
    )
    .expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric")
});

/// Cache lookups by namespace and result ("hit", "miss", "error")
pub static CACHE_LOOKUPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cache_lookups_total", "Cache lookups by result").namespace(NAMESPACE),
        &["namespace", "result"],
    )
    .expect("Failed to create CACHE_LOOKUPS_TOTAL metric")
});

/// Rate limit decisions by algorithm ("fixed", "sliding") and outcome
/// ("allowed", "denied", "fail_open")
pub static RATE_LIMIT_DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("rate_limit_decisions_total", "Rate limit decisions").namespace(NAMESPACE),
        &["algorithm", "outcome"],
    )
    .expect("Failed to create RATE_LIMIT_DECISIONS_TOTAL metric")
});

/// Pub/sub traffic by event ("published", "dispatched", "handler_error")
pub static PUBSUB_MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pubsub_messages_total", "Pub/sub messages").namespace(NAMESPACE),
        &["event"],
    )
    .expect("Failed to create PUBSUB_MESSAGES_TOTAL metric")
});

/// Identified push gateway sessions
pub static REALTIME_SESSIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "realtime_sessions_active",
            "Number of identified push gateway sessions",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create REALTIME_SESSIONS_ACTIVE metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("Failed to register HTTP_REQUESTS_TOTAL");
    registry
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS");
    registry
        .register(Box::new(CACHE_LOOKUPS_TOTAL.clone()))
        .expect("Failed to register CACHE_LOOKUPS_TOTAL");
    registry
        .register(Box::new(RATE_LIMIT_DECISIONS_TOTAL.clone()))
        .expect("Failed to register RATE_LIMIT_DECISIONS_TOTAL");
    registry
        .register(Box::new(PUBSUB_MESSAGES_TOTAL.clone()))
        .expect("Failed to register PUBSUB_MESSAGES_TOTAL");
    registry
        .register(Box::new(REALTIME_SESSIONS_ACTIVE.clone()))
        .expect("Failed to register REALTIME_SESSIONS_ACTIVE");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to record HTTP request metrics
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

pub fn record_cache_lookup(namespace: &str, result: &str) {
    CACHE_LOOKUPS_TOTAL
        .with_label_values(&[namespace, result])
        .inc();
}

pub fn record_rate_limit(algorithm: &str, outcome: &str) {
    RATE_LIMIT_DECISIONS_TOTAL
        .with_label_values(&[algorithm, outcome])
        .inc();
}

pub fn record_pubsub(event: &str) {
    PUBSUB_MESSAGES_TOTAL.with_label_values(&[event]).inc();
}

pub fn set_realtime_sessions(active: usize) {
    REALTIME_SESSIONS_ACTIVE.set(active as i64);
}
