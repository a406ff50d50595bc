//! Common Test Utilities
//!
//! Shared helpers, fixtures, and test infrastructure.

use std::sync::Arc;

use adpulse::config::{
    CacheSettings, CorsSettings, JwtSettings, RateLimitSettings, RealtimeSettings, RedisSettings,
    ServerSettings, SessionSettings, Settings, StoreBackend,
};
use adpulse::infrastructure::store::MemoryConnector;
use adpulse::startup::{build_router, AppState};
use axum::{
    body::Body,
    http::Request,
    response::Response,
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";

/// Settings on the in-process store with generous limits.
pub fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
        },
        redis: RedisSettings {
            url: "redis://127.0.0.1:6379".into(),
            backend: StoreBackend::Memory,
            connect_timeout_ms: 1000,
        },
        cache: CacheSettings {
            default_ttl_secs: 300,
        },
        session: SessionSettings { ttl_secs: 3600 },
        rate_limit: RateLimitSettings {
            api_limit: 1000,
            api_window_secs: 60,
            auth_limit: 1000,
            auth_window_secs: 60,
            websocket_limit: 100,
            websocket_window_secs: 60,
        },
        realtime: RealtimeSettings {
            heartbeat_interval_ms: 1000,
            heartbeat_timeout_ms: 5000,
            identify_timeout_secs: 5,
        },
        jwt: JwtSettings {
            secret: TEST_JWT_SECRET.into(),
        },
        cors: CorsSettings {
            allowed_origins: vec!["http://localhost:3000".into()],
        },
        environment: "test".into(),
    }
}

/// Test application builder
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    /// Full router over a fresh in-process store
    pub async fn new() -> Self {
        Self::with_settings(test_settings()).await
    }

    pub async fn with_settings(settings: Settings) -> Self {
        let state = AppState::build(settings, Arc::new(MemoryConnector::new()))
            .await
            .expect("Failed to build app state");
        let router = build_router(state.clone());
        Self { router, state }
    }

    /// Signs a bearer token for `user_id`
    pub fn token(&self, user_id: &str) -> String {
        self.state
            .tokens
            .issue(user_id, chrono::Duration::hours(1))
            .expect("Failed to issue token")
    }

    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Make a GET request to the application
    pub async fn get(&self, uri: &str) -> Response {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Make an authenticated GET request
    pub async fn get_auth(&self, uri: &str, token: &str) -> Response {
        self.request(
            Request::builder()
                .uri(uri)
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Make an authenticated request with a JSON body
    pub async fn send_json_auth(
        &self,
        method: &str,
        uri: &str,
        body: &Value,
        token: &str,
    ) -> Response {
        self.request(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Make an authenticated request without a body
    pub async fn send_auth(&self, method: &str, uri: &str, token: &str) -> Response {
        self.request(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

/// Reads a response body as JSON
pub async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Generate a unique user id
pub fn unique_user() -> String {
    format!("user_{}", &uuid::Uuid::new_v4().to_string()[..8])
}

/// Serves the full router on an ephemeral port. Returns the gateway URL.
pub async fn spawn_server(settings: Settings) -> (String, AppState) {
    let state = AppState::build(settings, Arc::new(MemoryConnector::new()))
        .await
        .expect("Failed to build app state");
    let router = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (format!("ws://{}/gateway", addr), state)
}
