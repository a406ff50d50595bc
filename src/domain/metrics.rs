//! Campaign Metrics
//!
//! Metric updates flowing from ingestion to connected dashboards, plus the
//! repository interface of the data layer that owns them.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Partial metric values (impressions, clicks, spend, ...) keyed by name.
pub type MetricValues = Map<String, Value>;

/// Composite identity of one metric stream: a campaign on one ad platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignKey {
    pub campaign_id: String,
    pub platform: String,
}

impl CampaignKey {
    pub fn new(campaign_id: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            platform: platform.into(),
        }
    }

    /// Pub/sub channel carrying updates for this stream.
    pub fn channel(&self) -> String {
        format!("{}{}:{}", METRICS_CHANNEL_PREFIX, self.campaign_id, self.platform)
    }
}

impl fmt::Display for CampaignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.campaign_id, self.platform)
    }
}

/// Prefix of every metric update channel (`metrics:{campaignId}:{platform}`).
pub const METRICS_CHANNEL_PREFIX: &str = "metrics:";

/// Pattern matching every metric update channel.
pub const METRICS_CHANNEL_PATTERN: &str = "metrics:*";

/// A single (partial) metric update for one campaign on one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricUpdate {
    /// Unique id, used by clients to drop redelivered updates
    pub id: Uuid,
    pub campaign_id: String,
    pub platform: String,
    pub metrics: MetricValues,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
}

impl MetricUpdate {
    pub fn new(
        campaign_id: impl Into<String>,
        platform: impl Into<String>,
        metrics: MetricValues,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id: campaign_id.into(),
            platform: platform.into(),
            metrics,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn key(&self) -> CampaignKey {
        CampaignKey::new(self.campaign_id.clone(), self.platform.clone())
    }
}

/// Campaign x platform filter a dashboard is interested in.
///
/// An empty platform set means "every platform of the listed campaigns".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFilter {
    pub campaign_ids: BTreeSet<String>,
    pub platforms: BTreeSet<String>,
}

impl SubscriptionFilter {
    pub fn new<C, P>(campaign_ids: C, platforms: P) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            campaign_ids: campaign_ids.into_iter().map(Into::into).collect(),
            platforms: platforms.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.campaign_ids.is_empty()
    }

    pub fn matches(&self, campaign_id: &str, platform: &str) -> bool {
        self.campaign_ids.contains(campaign_id)
            && (self.platforms.is_empty() || self.platforms.contains(platform))
    }

    pub fn extend(&mut self, other: &SubscriptionFilter) {
        self.campaign_ids.extend(other.campaign_ids.iter().cloned());
        self.platforms.extend(other.platforms.iter().cloned());
    }

    pub fn remove(&mut self, other: &SubscriptionFilter) {
        for id in &other.campaign_ids {
            self.campaign_ids.remove(id);
        }
        for platform in &other.platforms {
            self.platforms.remove(platform);
        }
    }
}

/// Data layer holding the authoritative metric values.
///
/// The cache layer only reaches it through `remember` producers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsRepository: Send + Sync {
    /// Merges the update into the stored values for its campaign/platform.
    async fn upsert(&self, update: &MetricUpdate) -> anyhow::Result<()>;

    /// Latest merged values for a campaign, optionally narrowed to one platform.
    async fn latest(
        &self,
        campaign_id: &str,
        platform: Option<String>,
    ) -> anyhow::Result<Vec<MetricUpdate>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_name() {
        let key = CampaignKey::new("cmp-1", "google");
        assert_eq!(key.channel(), "metrics:cmp-1:google");
        assert_eq!(key.to_string(), "cmp-1:google");
    }

    #[test]
    fn test_filter_matches_any_platform_when_empty() {
        let filter = SubscriptionFilter::new(["cmp-1"], Vec::<String>::new());
        assert!(filter.matches("cmp-1", "google"));
        assert!(filter.matches("cmp-1", "meta"));
        assert!(!filter.matches("cmp-2", "google"));
    }

    #[test]
    fn test_filter_matches_composite_key() {
        let filter = SubscriptionFilter::new(["cmp-1", "cmp-2"], ["google"]);
        assert!(filter.matches("cmp-2", "google"));
        assert!(!filter.matches("cmp-2", "meta"));
    }

    #[test]
    fn test_filter_extend_and_remove() {
        let mut filter = SubscriptionFilter::new(["a"], ["google"]);
        filter.extend(&SubscriptionFilter::new(["b"], ["meta"]));
        assert_eq!(filter.campaign_ids.len(), 2);
        filter.remove(&SubscriptionFilter::new(["a"], Vec::<String>::new()));
        assert!(!filter.campaign_ids.contains("a"));
        assert!(filter.platforms.contains("meta"));
    }

    #[test]
    fn test_update_serializes_camel_case() {
        let mut metrics = MetricValues::new();
        metrics.insert("clicks".into(), json!(12));
        let update = MetricUpdate::new("cmp-1", "google", metrics);
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["campaignId"], "cmp-1");
        assert_eq!(value["metrics"]["clicks"], 12);
    }
}
