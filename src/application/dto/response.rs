//! Response DTOs
//!
//! Data structures for API response bodies.

use serde::Serialize;
use uuid::Uuid;

use crate::application::services::IngestOutcome;
use crate::domain::MetricUpdate;
use crate::infrastructure::cache::SessionData;

/// Accepted metric update
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub id: Uuid,
    pub channel: String,
    /// Subscribed store connections the update was published to
    pub receivers: u64,
}

impl From<IngestOutcome> for IngestResponse {
    fn from(outcome: IngestOutcome) -> Self {
        Self {
            id: outcome.update.id,
            channel: outcome.update.key().channel(),
            receivers: outcome.receivers,
        }
    }
}

/// Latest metric values for a filter
#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub updates: Vec<MetricUpdate>,
}

/// A stored session
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: String,
    pub user_id: String,
    pub data: SessionData,
    /// Remaining lifetime in seconds, -1 when unknown
    pub ttl: i64,
}
