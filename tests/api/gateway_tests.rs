//! Push Gateway Tests
//!
//! Real sockets against a served router on the in-process store.

use std::sync::Arc;
use std::time::Duration;

use adpulse::client::{
    ChannelConfig, ChannelStatus, RealtimeChannel, StaticToken, WsConnector,
};
use adpulse::domain::SubscriptionFilter;
use adpulse::shared::protocol::{events, Frame, HelloPayload, IdentifyPayload, OpCode};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::common::{spawn_server, test_settings, unique_user};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn send(socket: &mut Socket, frame: Frame) {
    let text = serde_json::to_string(&frame).unwrap();
    socket.send(Message::Text(text)).await.unwrap();
}

/// Next frame that is not a heartbeat ack
async fn recv(socket: &mut Socket) -> Frame {
    loop {
        let message = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            let frame: Frame = serde_json::from_str(&text).unwrap();
            if frame.opcode() != Some(OpCode::HeartbeatAck) {
                return frame;
            }
        }
    }
}

fn values(value: serde_json::Value) -> adpulse::domain::MetricValues {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_identify_subscribe_and_receive_updates() {
    let (url, state) = spawn_server(test_settings()).await;
    let user = unique_user();
    let token = state.tokens.issue(&user, chrono::Duration::hours(1)).unwrap();

    let (mut socket, _) = connect_async(url.as_str()).await.unwrap();
    let hello = recv(&mut socket).await;
    assert_eq!(hello.opcode(), Some(OpCode::Hello));
    assert_eq!(hello.data::<HelloPayload>().unwrap().heartbeat_interval, 1000);

    send(
        &mut socket,
        Frame::with_data(OpCode::Identify, &IdentifyPayload { token }).unwrap(),
    )
    .await;
    let ready = recv(&mut socket).await;
    assert!(ready.is_event(events::READY));
    assert_eq!(ready.d.as_ref().unwrap()["userId"], user.as_str());
    assert_eq!(state.hub.session_count(), 1);

    let filter = SubscriptionFilter::new(["cmp-1"], ["google"]);
    send(&mut socket, Frame::with_data(OpCode::Subscribe, &filter).unwrap()).await;
    // The snapshot reply orders the subscribe before the publishes below
    send(&mut socket, Frame::with_data(OpCode::RequestSnapshot, &filter).unwrap()).await;
    let snapshot = recv(&mut socket).await;
    assert!(snapshot.is_event(events::SNAPSHOT));

    state
        .metrics
        .ingest("cmp-2", "google", values(json!({ "clicks": 1 })))
        .await
        .unwrap();
    state
        .metrics
        .ingest("cmp-1", "google", values(json!({ "clicks": 5 })))
        .await
        .unwrap();

    let update = recv(&mut socket).await;
    assert!(update.is_event(events::METRIC_UPDATE));
    let data = update.d.unwrap();
    assert_eq!(data["campaignId"], "cmp-1");
    assert_eq!(data["metrics"]["clicks"], 5);
    // READY and SNAPSHOT came first
    assert_eq!(update.s, Some(3));
}

#[tokio::test]
async fn test_invalid_token_gets_invalid_session() {
    let (url, state) = spawn_server(test_settings()).await;

    let (mut socket, _) = connect_async(url.as_str()).await.unwrap();
    assert_eq!(recv(&mut socket).await.opcode(), Some(OpCode::Hello));

    send(
        &mut socket,
        Frame::with_data(
            OpCode::Identify,
            &IdentifyPayload {
                token: "forged".into(),
            },
        )
        .unwrap(),
    )
    .await;

    let rejected = recv(&mut socket).await;
    assert_eq!(rejected.opcode(), Some(OpCode::InvalidSession));
    assert_eq!(state.hub.session_count(), 0);
}

#[tokio::test]
async fn test_session_record_removed_on_disconnect() {
    let (url, state) = spawn_server(test_settings()).await;
    let token = state
        .tokens
        .issue(&unique_user(), chrono::Duration::hours(1))
        .unwrap();

    let (mut socket, _) = connect_async(url.as_str()).await.unwrap();
    recv(&mut socket).await;
    send(
        &mut socket,
        Frame::with_data(OpCode::Identify, &IdentifyPayload { token }).unwrap(),
    )
    .await;
    let ready = recv(&mut socket).await;
    let session_id = ready.d.as_ref().unwrap()["sessionId"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(state.sessions.get(&session_id).await.is_some());

    socket.close(None).await.unwrap();

    timeout(Duration::from_secs(5), async {
        while state.hub.session_count() > 0 || state.sessions.get(&session_id).await.is_some() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("session was not cleaned up");
}

#[tokio::test]
async fn test_client_channel_receives_updates() {
    let (url, state) = spawn_server(test_settings()).await;
    let token = state
        .tokens
        .issue(&unique_user(), chrono::Duration::hours(1))
        .unwrap();

    let handle = RealtimeChannel::spawn(
        ChannelConfig {
            url,
            ..ChannelConfig::default()
        },
        Arc::new(WsConnector::default()),
        Arc::new(StaticToken(token)),
    );
    handle
        .subscribe(SubscriptionFilter::new(["cmp-9"], Vec::<String>::new()))
        .unwrap();
    handle.connect().unwrap();
    timeout(Duration::from_secs(5), handle.wait_connected())
        .await
        .unwrap()
        .unwrap();

    // Publish until the subscription has reached the gateway
    timeout(Duration::from_secs(5), async {
        loop {
            state
                .metrics
                .ingest("cmp-9", "tiktok", values(json!({ "impressions": 100 })))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            if handle.with_view(|view| view.values("cmp-9", "tiktok").is_some()) {
                break;
            }
        }
    })
    .await
    .expect("no update reached the client");

    handle.disconnect().unwrap();
    let mut status = handle.watch_status();
    status
        .wait_for(|s| *s == ChannelStatus::Closed)
        .await
        .unwrap();
}
