//! Session Handlers
//!
//! Login session records for the identity layer. A session is only visible
//! to the user whose token created it.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::application::dto::{
    CreateSessionRequest, RefreshSessionQuery, SessionResponse, UpdateSessionRequest,
};
use crate::infrastructure::cache::SessionData;
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::shared::validation::validation_error;
use crate::startup::AppState;

const USER_ID_FIELD: &str = "userId";

fn owner(data: &SessionData) -> Option<&str> {
    data.get(USER_ID_FIELD).and_then(Value::as_str)
}

fn not_found() -> AppError {
    AppError::NotFound("Session not found".into())
}

/// Loads a session owned by `auth`; foreign sessions look missing.
async fn load_owned(state: &AppState, auth: &AuthUser, session_id: &str) -> Result<SessionData, AppError> {
    match state.sessions.get(session_id).await {
        Some(data) if owner(&data) == Some(auth.user_id.as_str()) => Ok(data),
        _ => Err(not_found()),
    }
}

async fn respond(state: &AppState, session_id: String, user_id: String, data: SessionData) -> Json<SessionResponse> {
    let ttl = state.sessions.ttl(&session_id).await;
    Json(SessionResponse {
        session_id,
        user_id,
        data,
        ttl,
    })
}

/// Create a session for the authenticated user
pub async fn create_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    body.validate().map_err(validation_error)?;

    let session_id = Uuid::new_v4().to_string();
    let mut data = body.data;
    data.insert(USER_ID_FIELD.into(), Value::String(auth.user_id.clone()));

    state
        .sessions
        .create(&session_id, &data, body.ttl_secs)
        .await?;

    tracing::info!(session_id = %session_id, user_id = %auth.user_id, "Session created");
    Ok((
        StatusCode::CREATED,
        respond(&state, session_id, auth.user_id, data).await,
    ))
}

/// Get a session
pub async fn get_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let data = load_owned(&state, &auth, &session_id).await?;
    Ok(respond(&state, session_id, auth.user_id, data).await)
}

/// Merge fields into a session
pub async fn update_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<String>,
    Json(body): Json<UpdateSessionRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    body.validate().map_err(validation_error)?;
    load_owned(&state, &auth, &session_id).await?;

    // Ownership is not something a caller can rewrite
    let mut partial = body.data;
    partial.remove(USER_ID_FIELD);

    if !state
        .sessions
        .update(&session_id, partial, body.ttl_secs)
        .await?
    {
        return Err(not_found());
    }

    let data = load_owned(&state, &auth, &session_id).await?;
    Ok(respond(&state, session_id, auth.user_id, data).await)
}

/// Extend a session's lifetime
pub async fn refresh_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<String>,
    Query(query): Query<RefreshSessionQuery>,
) -> Result<StatusCode, AppError> {
    query.validate().map_err(validation_error)?;
    load_owned(&state, &auth, &session_id).await?;

    if state.sessions.refresh(&session_id, query.ttl_secs).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found())
    }
}

/// Destroy a session
pub async fn delete_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    load_owned(&state, &auth, &session_id).await?;

    if state.sessions.destroy(&session_id).await? {
        tracing::info!(session_id = %session_id, user_id = %auth.user_id, "Session destroyed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found())
    }
}
