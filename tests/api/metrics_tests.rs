//! Metric Ingestion and Snapshot API Tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{json_body, unique_user, TestApp};

#[tokio::test]
async fn test_ingest_requires_token() {
    let app = TestApp::new().await;

    let response = app.get("/api/v1/metrics?campaignIds=cmp-1").await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_ingest_rejects_invalid_token() {
    let app = TestApp::new().await;

    let response = app
        .get_auth("/api/v1/metrics?campaignIds=cmp-1", "not-a-jwt")
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["message"], "Invalid token");
}

#[tokio::test]
async fn test_ingest_publishes_to_campaign_channel() {
    let app = TestApp::new().await;
    let token = app.token(&unique_user());

    let response = app
        .send_json_auth(
            "POST",
            "/api/v1/metrics",
            &json!({
                "campaignId": "cmp-1",
                "platform": "google",
                "metrics": { "clicks": 10, "spend": 4.5 }
            }),
            &token,
        )
        .await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    assert_eq!(json["channel"], "metrics:cmp-1:google");
    // The push gateway's pattern subscription
    assert_eq!(json["receivers"], 1);
    assert!(json["id"].is_string());
}

#[tokio::test]
async fn test_ingest_validates_body() {
    let app = TestApp::new().await;
    let token = app.token(&unique_user());

    let response = app
        .send_json_auth(
            "POST",
            "/api/v1/metrics",
            &json!({ "campaignId": "cmp 1", "platform": "google", "metrics": {} }),
            &token,
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_snapshot_merges_partial_updates() {
    let app = TestApp::new().await;
    let token = app.token(&unique_user());

    for metrics in [json!({ "clicks": 3 }), json!({ "spend": 12.0 })] {
        let response = app
            .send_json_auth(
                "POST",
                "/api/v1/metrics",
                &json!({ "campaignId": "cmp-2", "platform": "meta", "metrics": metrics }),
                &token,
            )
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let response = app
        .get_auth("/api/v1/metrics?campaignIds=cmp-2&platforms=meta", &token)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let updates = json["updates"].as_array().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["metrics"], json!({ "clicks": 3, "spend": 12.0 }));
}

#[tokio::test]
async fn test_snapshot_sees_updates_after_cached_read() {
    let app = TestApp::new().await;
    let token = app.token(&unique_user());
    let ingest = |clicks: i64| {
        json!({ "campaignId": "cmp-3", "platform": "google", "metrics": { "clicks": clicks } })
    };

    app.send_json_auth("POST", "/api/v1/metrics", &ingest(1), &token)
        .await;
    let first = json_body(app.get_auth("/api/v1/metrics?campaignIds=cmp-3", &token).await).await;
    assert_eq!(first["updates"][0]["metrics"]["clicks"], 1);

    app.send_json_auth("POST", "/api/v1/metrics", &ingest(2), &token)
        .await;
    let second = json_body(app.get_auth("/api/v1/metrics?campaignIds=cmp-3", &token).await).await;
    assert_eq!(second["updates"][0]["metrics"]["clicks"], 2);
}

#[tokio::test]
async fn test_snapshot_requires_campaigns() {
    let app = TestApp::new().await;
    let token = app.token(&unique_user());

    let response = app.get_auth("/api/v1/metrics?campaignIds=,", &token).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cache_stats_count_snapshot_lookups() {
    let app = TestApp::new().await;
    let token = app.token(&unique_user());

    app.get_auth("/api/v1/metrics?campaignIds=cmp-4", &token).await;
    app.get_auth("/api/v1/metrics?campaignIds=cmp-4", &token).await;

    let response = app.get_auth("/api/v1/cache/stats", &token).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["namespace"], "cache");
    assert_eq!(json["misses"], 1);
    assert_eq!(json["hits"], 1);
}
