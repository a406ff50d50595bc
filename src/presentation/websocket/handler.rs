//! WebSocket Connection Handler
//!
//! Drives one push connection: Hello, Identify, READY, then the main loop
//! of heartbeats, filter changes and snapshot requests.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use super::hub::FrameSender;
use super::session::SessionState;
use crate::domain::SubscriptionFilter;
use crate::infrastructure::cache::SessionData;
use crate::shared::protocol::{
    events, Frame, HelloPayload, IdentifyPayload, OpCode, ReadyPayload, SnapshotPayload,
    SubscriptionPayload,
};
use crate::startup::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn invalid_session() -> Frame {
    Frame {
        op: OpCode::InvalidSession as u8,
        d: Some(Value::Bool(false)),
        s: None,
        t: None,
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4().to_string();
    let mut session_state = SessionState::new(session_id.clone());

    tracing::debug!(session_id = %session_id, "New WebSocket connection");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

    let hello = Frame::with_data(
        OpCode::Hello,
        &HelloPayload {
            heartbeat_interval: state.hub.heartbeat_interval(),
        },
    )
    .and_then(|frame| serde_json::to_string(&frame));
    let hello = match hello {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to serialize Hello: {}", e);
            return;
        }
    };
    if let Err(e) = sender.send(Message::Text(hello.into())).await {
        tracing::error!("Failed to send Hello: {}", e);
        return;
    }

    // Forward queued frames to the socket
    let sender_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("Failed to serialize frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let identify_timeout = Duration::from_secs(state.settings.realtime.identify_timeout_secs);
    let identify_result = timeout(identify_timeout, async {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let Ok(frame) = serde_json::from_str::<Frame>(&text) else {
                        continue;
                    };
                    if frame.opcode() == Some(OpCode::Identify) {
                        if let Ok(identify) = frame.data::<IdentifyPayload>() {
                            return Some(identify);
                        }
                    }
                }
                Ok(Message::Close(_)) | Err(_) => return None,
                _ => continue,
            }
        }
        None
    })
    .await;

    let identify = match identify_result {
        Ok(Some(identify)) => identify,
        Ok(None) => {
            tracing::debug!(session_id = %session_id, "Connection closed before Identify");
            sender_task.abort();
            return;
        }
        Err(_) => {
            tracing::debug!(session_id = %session_id, "Identify timeout");
            reject(&tx, sender_task).await;
            return;
        }
    };

    let user_id = match state.tokens.verify(&identify.token) {
        Ok(claims) => claims.sub,
        Err(e) => {
            tracing::debug!(session_id = %session_id, error = %e, "Invalid token");
            reject(&tx, sender_task).await;
            return;
        }
    };
    session_state.user_id = Some(user_id.clone());
    session_state.heartbeat();

    state
        .hub
        .register_session(session_id.clone(), user_id.clone(), tx.clone());

    let mut record = SessionData::new();
    record.insert("userId".into(), Value::String(user_id.clone()));
    record.insert(
        "connectedAt".into(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    record.insert("filter".into(), filter_value(&SubscriptionFilter::default()));
    if let Err(e) = state.sessions.create(&session_id, &record, None).await {
        tracing::warn!(session_id = %session_id, error = %e, "Failed to persist session");
    }

    let ready = ReadyPayload {
        session_id: session_id.clone(),
        user_id: user_id.clone(),
    };
    if !state
        .hub
        .dispatch_to_session(&session_id, events::READY, &ready)
    {
        cleanup(&state, &session_id).await;
        sender_task.abort();
        return;
    }

    tracing::info!(
        user_id = %user_id,
        session_id = %session_id,
        "Dashboard connected and identified"
    );

    let heartbeat_timeout_ms = state.settings.realtime.heartbeat_timeout_ms;
    let mut heartbeat_check = interval(Duration::from_millis(state.hub.heartbeat_interval()));
    heartbeat_check.tick().await;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        session_state.heartbeat();
                        if let Err(e) = handle_message(&text, &session_state, &tx, &state).await {
                            tracing::debug!(
                                session_id = %session_id,
                                error = %e,
                                "Error handling message"
                            );
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(session_id = %session_id, "Connection closed");
                        break;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        session_state.heartbeat();
                    }
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session_id, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }

            _ = heartbeat_check.tick() => {
                if !session_state.is_alive(heartbeat_timeout_ms) {
                    tracing::info!(
                        session_id = %session_id,
                        "Heartbeat timeout, closing connection"
                    );
                    break;
                }
            }
        }

        if sender_task.is_finished() {
            break;
        }
    }

    cleanup(&state, &session_id).await;
    sender_task.abort();

    tracing::info!(
        user_id = %user_id,
        session_id = %session_id,
        "Dashboard disconnected"
    );
}

async fn reject(tx: &FrameSender, sender_task: tokio::task::JoinHandle<()>) {
    let _ = tx.send(invalid_session());
    tokio::time::sleep(Duration::from_millis(100)).await;
    sender_task.abort();
}

async fn cleanup(state: &AppState, session_id: &str) {
    state.hub.unregister_session(session_id);
    if let Err(e) = state.sessions.destroy(session_id).await {
        tracing::warn!(session_id, error = %e, "Failed to destroy session");
    }
}

fn filter_value(filter: &SubscriptionFilter) -> Value {
    serde_json::to_value(filter).unwrap_or(Value::Null)
}

/// Stores the session's current filter in its session record.
async fn persist_filter(state: &AppState, session_id: &str, filter: &SubscriptionFilter) {
    let mut partial = SessionData::new();
    partial.insert("filter".into(), filter_value(filter));
    match state.sessions.update(session_id, partial, None).await {
        Ok(true) => {}
        Ok(false) => tracing::debug!(session_id, "Session record missing, filter not persisted"),
        Err(e) => tracing::warn!(session_id, error = %e, "Failed to persist filter"),
    }
}

/// Handle an inbound frame of an identified session
async fn handle_message(
    text: &str,
    session_state: &SessionState,
    tx: &FrameSender,
    state: &AppState,
) -> Result<(), String> {
    let frame: Frame = serde_json::from_str(text).map_err(|e| format!("Invalid JSON: {}", e))?;
    let session_id = session_state.session_id.as_str();

    match frame.opcode() {
        Some(OpCode::Heartbeat) => {
            if let Err(e) = state.sessions.refresh(session_id, None).await {
                tracing::warn!(session_id, error = %e, "Failed to refresh session");
            }
            let _ = tx.send(Frame::op(OpCode::HeartbeatAck));
            tracing::trace!(session_id, "Heartbeat received");
        }

        Some(OpCode::Subscribe) => {
            let payload: SubscriptionPayload =
                frame.data().map_err(|e| format!("Invalid subscribe payload: {}", e))?;
            if let Some(filter) = state.hub.subscribe(session_id, &payload) {
                tracing::debug!(session_id, campaigns = filter.campaign_ids.len(), "Subscribed");
                persist_filter(state, session_id, &filter).await;
            }
        }

        Some(OpCode::Unsubscribe) => {
            let payload: SubscriptionPayload =
                frame.data().map_err(|e| format!("Invalid unsubscribe payload: {}", e))?;
            if let Some(filter) = state.hub.unsubscribe(session_id, &payload) {
                tracing::debug!(session_id, campaigns = filter.campaign_ids.len(), "Unsubscribed");
                persist_filter(state, session_id, &filter).await;
            }
        }

        Some(OpCode::RequestSnapshot) => {
            // An empty request means "everything this session follows"
            let requested: SubscriptionPayload = frame.data().unwrap_or_default();
            let filter = if requested.is_empty() {
                state.hub.session_filter(session_id).unwrap_or_default()
            } else {
                requested
            };
            let updates = state
                .metrics
                .snapshot(&filter)
                .await
                .map_err(|e| format!("Snapshot failed: {}", e))?;
            state
                .hub
                .dispatch_to_session(session_id, events::SNAPSHOT, &SnapshotPayload { updates });
        }

        _ => {
            tracing::debug!(session_id, op = frame.op, "Unknown opcode");
        }
    }

    Ok(())
}
