//! Rate Limiting Tests

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use pretty_assertions::assert_eq;

use crate::common::{json_body, test_settings, unique_user, TestApp};

fn gateway_request(ip: &str) -> Request<Body> {
    Request::builder()
        .uri("/gateway")
        .header("x-forwarded-for", ip)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_api_limit_returns_429_after_limit() {
    let mut settings = test_settings();
    settings.rate_limit.api_limit = 3;
    let app = TestApp::with_settings(settings).await;
    let token = app.token(&unique_user());

    for expected_remaining in ["2", "1", "0"] {
        let response = app.get_auth("/api/v1/cache/stats", &token).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["X-RateLimit-Limit"], "3");
        assert_eq!(response.headers()["X-RateLimit-Remaining"], expected_remaining);
    }

    let response = app.get_auth("/api/v1/cache/stats", &token).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    let json = json_body(response).await;
    assert_eq!(json["remaining"], 0);
    assert!(json["resetTime"].is_i64());
}

#[tokio::test]
async fn test_api_limit_is_per_user() {
    let mut settings = test_settings();
    settings.rate_limit.api_limit = 1;
    let app = TestApp::with_settings(settings).await;
    let first = app.token(&unique_user());
    let second = app.token(&unique_user());

    assert_eq!(app.get_auth("/api/v1/cache/stats", &first).await.status(), StatusCode::OK);
    assert_eq!(
        app.get_auth("/api/v1/cache/stats", &first).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(app.get_auth("/api/v1/cache/stats", &second).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_session_routes_use_auth_limit() {
    let mut settings = test_settings();
    settings.rate_limit.auth_limit = 1;
    let app = TestApp::with_settings(settings).await;
    let token = app.token(&unique_user());

    let uri = "/api/v1/sessions/missing";
    assert_eq!(app.get_auth(uri, &token).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        app.get_auth(uri, &token).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    // Separate bucket from the API tier
    assert_eq!(app.get_auth("/api/v1/cache/stats", &token).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_gateway_sliding_window_per_client_ip() {
    let mut settings = test_settings();
    settings.rate_limit.websocket_limit = 2;
    let app = TestApp::with_settings(settings).await;

    for _ in 0..2 {
        let response = app.request(gateway_request("198.51.100.7")).await;
        assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    let response = app.request(gateway_request("198.51.100.7")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    let response = app.request(gateway_request("198.51.100.8")).await;
    assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_store_outage_fails_open() {
    let mut settings = test_settings();
    settings.rate_limit.api_limit = 1;
    let app = TestApp::with_settings(settings).await;
    let token = app.token(&unique_user());
    app.state.store.shutdown().await;

    for _ in 0..3 {
        let response = app
            .get_auth("/api/v1/metrics?campaignIds=cmp-1", &token)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
