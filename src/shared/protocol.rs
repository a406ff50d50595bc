//! Realtime Push Protocol
//!
//! Frame format shared by the websocket gateway and the client channel.
//! Every frame is a JSON object `{op, d, s, t}`: an opcode, an optional
//! payload, a per-session dispatch sequence and a dispatch event name.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::domain::{MetricUpdate, SubscriptionFilter};

/// Gateway opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Event dispatch (server -> client)
    Dispatch = 0,
    /// Liveness ping (client -> server)
    Heartbeat = 1,
    /// Authenticate the connection (client -> server)
    Identify = 2,
    /// Add campaign/platform filters (client -> server)
    Subscribe = 3,
    /// Remove campaign/platform filters (client -> server)
    Unsubscribe = 4,
    /// Ask for a cached snapshot of the given filters (client -> server)
    RequestSnapshot = 5,
    /// Authentication failed or timed out (server -> client)
    InvalidSession = 9,
    /// Sent on connect with the heartbeat interval (server -> client)
    Hello = 10,
    /// Heartbeat acknowledgement (server -> client)
    HeartbeatAck = 11,
}

impl OpCode {
    pub fn from_u8(op: u8) -> Option<Self> {
        Some(match op {
            0 => OpCode::Dispatch,
            1 => OpCode::Heartbeat,
            2 => OpCode::Identify,
            3 => OpCode::Subscribe,
            4 => OpCode::Unsubscribe,
            5 => OpCode::RequestSnapshot,
            9 => OpCode::InvalidSession,
            10 => OpCode::Hello,
            11 => OpCode::HeartbeatAck,
            _ => return None,
        })
    }
}

/// Dispatch event names (`t` field)
pub mod events {
    pub const READY: &str = "READY";
    pub const METRIC_UPDATE: &str = "METRIC_UPDATE";
    pub const SNAPSHOT: &str = "SNAPSHOT";
}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub op: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Frame {
    /// A frame without payload.
    pub fn op(op: OpCode) -> Self {
        Self {
            op: op as u8,
            d: None,
            s: None,
            t: None,
        }
    }

    /// A frame carrying a serialized payload.
    pub fn with_data<T: Serialize>(op: OpCode, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op: op as u8,
            d: Some(serde_json::to_value(data)?),
            s: None,
            t: None,
        })
    }

    /// A dispatch frame for `event` with sequence `sequence`.
    pub fn dispatch<T: Serialize>(
        event: &str,
        data: &T,
        sequence: u64,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op: OpCode::Dispatch as u8,
            d: Some(serde_json::to_value(data)?),
            s: Some(sequence),
            t: Some(event.to_string()),
        })
    }

    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u8(self.op)
    }

    pub fn is_event(&self, event: &str) -> bool {
        self.t.as_deref() == Some(event)
    }

    /// Decodes the payload; a missing payload decodes as JSON `null`.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.d.clone().unwrap_or(serde_json::Value::Null))
    }
}

/// Hello payload (op 10)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

/// Identify payload (op 2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
}

/// Ready payload (dispatch READY)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    pub session_id: String,
    pub user_id: String,
}

/// Subscribe / Unsubscribe / RequestSnapshot payload (ops 3, 4, 5)
pub type SubscriptionPayload = SubscriptionFilter;

/// Snapshot payload (dispatch SNAPSHOT)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub updates: Vec<MetricUpdate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_without_payload_is_compact() {
        let json = serde_json::to_string(&Frame::op(OpCode::Heartbeat)).unwrap();
        assert_eq!(json, r#"{"op":1}"#);
    }

    #[test]
    fn test_dispatch_frame_fields() {
        let frame = Frame::dispatch(
            events::READY,
            &ReadyPayload {
                session_id: "s-1".into(),
                user_id: "u-1".into(),
            },
            7,
        )
        .unwrap();
        assert_eq!(frame.opcode(), Some(OpCode::Dispatch));
        assert!(frame.is_event(events::READY));
        assert_eq!(frame.s, Some(7));
        let ready: ReadyPayload = frame.data().unwrap();
        assert_eq!(ready.session_id, "s-1");
    }

    #[test]
    fn test_subscription_payload_parses_from_client_json() {
        let frame: Frame = serde_json::from_str(
            r#"{"op":3,"d":{"campaignIds":["c1","c2"],"platforms":["google"]}}"#,
        )
        .unwrap();
        assert_eq!(frame.opcode(), Some(OpCode::Subscribe));
        let payload: SubscriptionPayload = frame.data().unwrap();
        assert!(payload.matches("c2", "google"));
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(OpCode::from_u8(42), None);
        assert_eq!(OpCode::from_u8(11), Some(OpCode::HeartbeatAck));
    }
}
