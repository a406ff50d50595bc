//! Session API Tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::common::{json_body, unique_user, TestApp};

async fn create(app: &TestApp, token: &str, body: Value) -> Value {
    let response = app
        .send_json_auth("POST", "/api/v1/sessions", &body, token)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await
}

#[tokio::test]
async fn test_create_and_get_session() {
    let app = TestApp::new().await;
    let user = unique_user();
    let token = app.token(&user);

    let created = create(&app, &token, json!({ "data": { "theme": "dark" }, "ttlSecs": 600 })).await;
    assert_eq!(created["userId"], user.as_str());
    assert_eq!(created["data"]["theme"], "dark");
    assert_eq!(created["data"]["userId"], user.as_str());
    let ttl = created["ttl"].as_i64().unwrap();
    assert!((1..=600).contains(&ttl));

    let id = created["sessionId"].as_str().unwrap();
    let response = app
        .get_auth(&format!("/api/v1/sessions/{}", id), &token)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["theme"], "dark");
}

#[tokio::test]
async fn test_create_uses_default_ttl() {
    let app = TestApp::new().await;
    let token = app.token(&unique_user());

    let created = create(&app, &token, json!({})).await;

    let ttl = created["ttl"].as_i64().unwrap();
    assert!(ttl > 3500 && ttl <= 3600);
}

#[tokio::test]
async fn test_create_rejects_zero_ttl() {
    let app = TestApp::new().await;
    let token = app.token(&unique_user());

    let response = app
        .send_json_auth("POST", "/api/v1/sessions", &json!({ "ttlSecs": 0 }), &token)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_foreign_session_is_not_found() {
    let app = TestApp::new().await;
    let owner = app.token(&unique_user());
    let other = app.token(&unique_user());

    let created = create(&app, &owner, json!({})).await;
    let uri = format!("/api/v1/sessions/{}", created["sessionId"].as_str().unwrap());

    assert_eq!(app.get_auth(&uri, &other).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        app.send_auth("DELETE", &uri, &other).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(app.get_auth(&uri, &owner).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_update_merges_fields_and_keeps_owner() {
    let app = TestApp::new().await;
    let user = unique_user();
    let token = app.token(&user);

    let created = create(&app, &token, json!({ "data": { "theme": "dark", "page": 1 } })).await;
    let uri = format!("/api/v1/sessions/{}", created["sessionId"].as_str().unwrap());

    let response = app
        .send_json_auth(
            "PATCH",
            &uri,
            &json!({ "data": { "page": 2, "userId": "someone-else" } }),
            &token,
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["theme"], "dark");
    assert_eq!(json["data"]["page"], 2);
    assert_eq!(json["data"]["userId"], user.as_str());
}

#[tokio::test]
async fn test_refresh_extends_ttl() {
    let app = TestApp::new().await;
    let token = app.token(&unique_user());

    let created = create(&app, &token, json!({ "ttlSecs": 60 })).await;
    let uri = format!("/api/v1/sessions/{}", created["sessionId"].as_str().unwrap());

    let response = app
        .send_auth("POST", &format!("{}/refresh?ttlSecs=7200", uri), &token)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let ttl = json_body(app.get_auth(&uri, &token).await).await["ttl"]
        .as_i64()
        .unwrap();
    assert!(ttl > 3600);
}

#[tokio::test]
async fn test_delete_session() {
    let app = TestApp::new().await;
    let token = app.token(&unique_user());

    let created = create(&app, &token, json!({})).await;
    let uri = format!("/api/v1/sessions/{}", created["sessionId"].as_str().unwrap());

    assert_eq!(
        app.send_auth("DELETE", &uri, &token).await.status(),
        StatusCode::NO_CONTENT
    );
    assert_eq!(app.get_auth(&uri, &token).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        app.send_auth("DELETE", &uri, &token).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_missing_session_is_not_found() {
    let app = TestApp::new().await;
    let token = app.token(&unique_user());

    let response = app
        .get_auth("/api/v1/sessions/does-not-exist", &token)
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
