//! Request DTOs
//!
//! Data structures for API request bodies and query strings.

use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::domain::{MetricValues, SubscriptionFilter};
use crate::infrastructure::cache::SessionData;

/// Longest session lifetime a caller may request (30 days)
pub const MAX_SESSION_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Metric ingestion request (`POST /api/v1/metrics`)
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IngestMetricsRequest {
    #[validate(
        length(min = 1, max = 128, message = "campaignId must be 1-128 characters"),
        custom(function = "validate_identifier")
    )]
    pub campaign_id: String,

    #[validate(
        length(min = 1, max = 64, message = "platform must be 1-64 characters"),
        custom(function = "validate_identifier")
    )]
    pub platform: String,

    #[validate(custom(function = "validate_metrics"))]
    pub metrics: MetricValues,
}

/// Snapshot query (`GET /api/v1/metrics?campaignIds=a,b&platforms=google`)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotQuery {
    pub campaign_ids: String,
    #[serde(default)]
    pub platforms: Option<String>,
}

impl SnapshotQuery {
    /// Splits the comma separated lists into a filter.
    pub fn into_filter(self) -> SubscriptionFilter {
        let split = |s: &str| {
            s.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        SubscriptionFilter::new(
            split(&self.campaign_ids),
            self.platforms.as_deref().map(split).unwrap_or_default(),
        )
    }
}

/// Session creation request (`POST /api/v1/sessions`)
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub data: SessionData,

    #[validate(range(min = 1, max = MAX_SESSION_TTL_SECS, message = "ttlSecs out of range"))]
    pub ttl_secs: Option<u64>,
}

/// Session merge request (`PATCH /api/v1/sessions/{id}`)
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionRequest {
    pub data: SessionData,

    #[validate(range(min = 1, max = MAX_SESSION_TTL_SECS, message = "ttlSecs out of range"))]
    pub ttl_secs: Option<u64>,
}

/// Session refresh query (`POST /api/v1/sessions/{id}/refresh?ttlSecs=600`)
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSessionQuery {
    #[validate(range(min = 1, max = MAX_SESSION_TTL_SECS, message = "ttlSecs out of range"))]
    pub ttl_secs: Option<u64>,
}

/// Identifiers become parts of store keys and channel names, so separators
/// and glob characters are rejected.
fn validate_identifier(value: &str) -> Result<(), ValidationError> {
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("identifier")
            .with_message("may only contain letters, digits, '-', '_' and '.'".into()))
    }
}

fn validate_metrics(metrics: &MetricValues) -> Result<(), ValidationError> {
    if metrics.is_empty() {
        return Err(ValidationError::new("metrics").with_message("must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn request(campaign_id: &str, platform: &str, metrics: serde_json::Value) -> IngestMetricsRequest {
        serde_json::from_value(json!({
            "campaignId": campaign_id,
            "platform": platform,
            "metrics": metrics,
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_request() {
        assert!(request("cmp-1", "google", json!({"clicks": 1})).validate().is_ok());
    }

    #[test_case("", "google" ; "empty campaign")]
    #[test_case("cmp:1", "google" ; "separator in campaign")]
    #[test_case("cmp-1", "goo*" ; "glob in platform")]
    fn test_invalid_identifiers(campaign_id: &str, platform: &str) {
        assert!(request(campaign_id, platform, json!({"clicks": 1})).validate().is_err());
    }

    #[test]
    fn test_empty_metrics_rejected() {
        assert!(request("cmp-1", "google", json!({})).validate().is_err());
    }

    #[test_case(None, true ; "default ttl")]
    #[test_case(Some(3600), true ; "one hour")]
    #[test_case(Some(0), false ; "zero")]
    #[test_case(Some(MAX_SESSION_TTL_SECS + 1), false ; "too long")]
    fn test_session_ttl_bounds(ttl_secs: Option<u64>, valid: bool) {
        let request = CreateSessionRequest {
            data: SessionData::new(),
            ttl_secs,
        };
        assert_eq!(request.validate().is_ok(), valid);
    }

    #[test]
    fn test_create_session_body_is_optional_fields() {
        let request: CreateSessionRequest = serde_json::from_value(json!({})).unwrap();
        assert!(request.data.is_empty());
        assert!(request.ttl_secs.is_none());
    }

    #[test]
    fn test_snapshot_query_into_filter() {
        let query = SnapshotQuery {
            campaign_ids: "c1, c2,,".into(),
            platforms: Some("google".into()),
        };
        let filter = query.into_filter();
        assert_eq!(filter.campaign_ids.len(), 2);
        assert!(filter.matches("c2", "google"));
        assert!(!filter.matches("c2", "meta"));
    }
}
