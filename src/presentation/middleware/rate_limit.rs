//! Rate Limiting Middleware
//!
//! Applies the store-backed rate limiter before a request reaches its
//! handler. API and auth routes use fixed windows, the push gateway
//! handshake uses a sliding window. Store failures let requests through.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::RateLimitSettings;
use crate::infrastructure::rate_limit::RateLimitDecision;
use crate::presentation::middleware::auth::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Rate limited endpoint groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    /// Session endpoints of the identity layer
    Auth,
    /// Standard API endpoints
    Api,
    /// WebSocket connection establishment
    WebSocket,
}

impl EndpointType {
    /// `(limit, window_secs)` for this group.
    pub fn limits(&self, settings: &RateLimitSettings) -> (u32, u64) {
        match self {
            EndpointType::Auth => (settings.auth_limit, settings.auth_window_secs),
            EndpointType::Api => (settings.api_limit, settings.api_window_secs),
            EndpointType::WebSocket => (settings.websocket_limit, settings.websocket_window_secs),
        }
    }

    fn key_prefix(&self) -> &'static str {
        match self {
            EndpointType::Auth => "auth",
            EndpointType::Api => "api",
            EndpointType::WebSocket => "ws",
        }
    }
}

/// Extract the rate limit identifier from a request.
///
/// Priority: authenticated user, X-Forwarded-For, X-Real-IP, peer address.
fn extract_identifier(request: &Request, client_ip: Option<IpAddr>) -> String {
    if let Some(auth_user) = request.extensions().get::<AuthUser>() {
        return format!("user:{}", auth_user.user_id);
    }

    // First IP in the chain is the original client
    if let Some(forwarded_for) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
    {
        if let Some(first_ip) = forwarded_for.split(',').next() {
            let ip = first_ip.trim();
            if ip.parse::<IpAddr>().is_ok() {
                return format!("ip:{}", ip);
            }
        }
    }

    if let Some(real_ip) = request
        .headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
    {
        if real_ip.parse::<IpAddr>().is_ok() {
            return format!("ip:{}", real_ip);
        }
    }

    match client_ip {
        Some(ip) => format!("ip:{}", ip),
        None => {
            tracing::warn!("Could not determine client identifier for rate limiting");
            "ip:unknown".to_string()
        }
    }
}

/// Rate limiting middleware for session endpoints.
pub async fn rate_limit_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    rate_limit_inner(state, request, next, EndpointType::Auth).await
}

/// Rate limiting middleware for standard API endpoints.
pub async fn rate_limit_api(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    rate_limit_inner(state, request, next, EndpointType::Api).await
}

/// Rate limiting middleware for WebSocket connections.
pub async fn rate_limit_websocket(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    rate_limit_inner(state, request, next, EndpointType::WebSocket).await
}

async fn rate_limit_inner(
    state: AppState,
    request: Request,
    next: Next,
    endpoint_type: EndpointType,
) -> Response {
    // Absent when the router is served without connect info (tests)
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());
    let key = format!(
        "{}:{}",
        endpoint_type.key_prefix(),
        extract_identifier(&request, client_ip)
    );
    let (limit, window_secs) = endpoint_type.limits(&state.settings.rate_limit);

    let decision = match endpoint_type {
        EndpointType::WebSocket => {
            let allowed = state
                .rate_limiter
                .check_sliding_window(&key, limit, window_secs)
                .await;
            sliding_decision(allowed, limit, window_secs)
        }
        EndpointType::Auth | EndpointType::Api => {
            state
                .rate_limiter
                .check_rate_limit(&key, limit, window_secs)
                .await
        }
    };

    if decision.allowed {
        let mut response = next.run(request).await;
        add_rate_limit_headers(response.headers_mut(), &decision);
        response
    } else {
        tracing::warn!(
            key = %key,
            endpoint_type = ?endpoint_type,
            "Rate limit exceeded"
        );
        create_rate_limit_response(decision)
    }
}

/// The sliding window only answers allow/deny, so `remaining` is a lower
/// bound and the reset time is the furthest point the log can still block.
fn sliding_decision(allowed: bool, limit: u32, window_secs: u64) -> RateLimitDecision {
    RateLimitDecision {
        allowed,
        limit,
        remaining: if allowed { 1 } else { 0 },
        reset_time: chrono::Utc::now().timestamp_millis() + (window_secs * 1000) as i64,
    }
}

/// Add X-RateLimit-* headers to a response.
fn add_rate_limit_headers(headers: &mut header::HeaderMap, decision: &RateLimitDecision) {
    if let Ok(v) = header::HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = header::HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = header::HeaderValue::from_str(&decision.reset_time.to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
}

/// Create a 429 Too Many Requests response.
fn create_rate_limit_response(decision: RateLimitDecision) -> Response {
    let retry_after_ms = (decision.reset_time - chrono::Utc::now().timestamp_millis()).max(0);
    let retry_after = (retry_after_ms as u64).div_ceil(1000);

    let mut response = AppError::RateLimited {
        remaining: decision.remaining,
        reset_time: decision.reset_time,
    }
    .into_response();

    if let Ok(v) = header::HeaderValue::from_str(&retry_after.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, v);
    }
    add_rate_limit_headers(response.headers_mut(), &decision);

    response
}
