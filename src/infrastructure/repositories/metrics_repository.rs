//! Metrics Repository Implementation
//!
//! Process-local implementation of the `MetricsRepository` trait. Keeps the
//! merged latest values of every campaign/platform stream.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::{CampaignKey, MetricUpdate, MetricsRepository};

/// In-memory metrics repository.
#[derive(Debug, Default)]
pub struct InMemoryMetricsRepository {
    latest: DashMap<CampaignKey, MetricUpdate>,
}

impl InMemoryMetricsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsRepository for InMemoryMetricsRepository {
    async fn upsert(&self, update: &MetricUpdate) -> anyhow::Result<()> {
        self.latest
            .entry(update.key())
            .and_modify(|stored| {
                stored
                    .metrics
                    .extend(update.metrics.iter().map(|(k, v)| (k.clone(), v.clone())));
                stored.id = update.id;
                stored.timestamp = stored.timestamp.max(update.timestamp);
            })
            .or_insert_with(|| update.clone());
        Ok(())
    }

    async fn latest(
        &self,
        campaign_id: &str,
        platform: Option<String>,
    ) -> anyhow::Result<Vec<MetricUpdate>> {
        let mut updates: Vec<MetricUpdate> = self
            .latest
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.campaign_id == campaign_id
                    && platform.as_deref().map_or(true, |p| key.platform == p)
            })
            .map(|entry| entry.value().clone())
            .collect();
        updates.sort_by(|a, b| a.platform.cmp(&b.platform));
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MetricValues;
    use serde_json::json;

    fn values(value: serde_json::Value) -> MetricValues {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_upsert_merges_partial_metrics() {
        let repository = InMemoryMetricsRepository::new();
        repository
            .upsert(&MetricUpdate::new("c1", "google", values(json!({"clicks": 1, "spend": 2.0}))))
            .await
            .unwrap();
        repository
            .upsert(&MetricUpdate::new("c1", "google", values(json!({"clicks": 5}))))
            .await
            .unwrap();

        let latest = repository.latest("c1", None).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(
            serde_json::Value::Object(latest[0].metrics.clone()),
            json!({"clicks": 5, "spend": 2.0})
        );
    }

    #[tokio::test]
    async fn test_latest_filters_by_platform() {
        let repository = InMemoryMetricsRepository::new();
        for platform in ["meta", "google"] {
            repository
                .upsert(&MetricUpdate::new("c1", platform, MetricValues::new()))
                .await
                .unwrap();
        }
        repository
            .upsert(&MetricUpdate::new("c2", "google", MetricValues::new()))
            .await
            .unwrap();

        let all = repository.latest("c1", None).await.unwrap();
        let platforms: Vec<_> = all.iter().map(|u| u.platform.as_str()).collect();
        assert_eq!(platforms, vec!["google", "meta"]);

        let google = repository
            .latest("c1", Some("google".into()))
            .await
            .unwrap();
        assert_eq!(google.len(), 1);
    }
}
