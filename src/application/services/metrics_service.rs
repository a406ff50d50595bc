//! Metrics Service
//!
//! Write path: persist an update, drop the campaign's cached reads and
//! publish the update to connected dashboards.
//! Read path: cache-aside snapshots per campaign/platform.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::domain::{MetricUpdate, MetricValues, MetricsRepository, SubscriptionFilter};
use crate::infrastructure::cache::CacheService;
use crate::infrastructure::pubsub::PubSubRegistry;
use crate::infrastructure::store::{escape_glob, StoreError};
use crate::shared::error::AppError;

/// Metrics service trait
#[async_trait]
pub trait MetricsService: Send + Sync {
    /// Store and broadcast a partial metric update
    async fn ingest(
        &self,
        campaign_id: &str,
        platform: &str,
        metrics: MetricValues,
    ) -> Result<IngestOutcome, MetricsError>;

    /// Latest values for every campaign/platform in `filter`
    async fn snapshot(&self, filter: &SubscriptionFilter) -> Result<Vec<MetricUpdate>, MetricsError>;
}

/// Result of an accepted update
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub update: MetricUpdate,
    pub receivers: u64,
}

/// Metrics service errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Repository error: {0}")]
    Repository(String),
}

impl From<MetricsError> for AppError {
    fn from(e: MetricsError) -> Self {
        match e {
            MetricsError::Store(e) => AppError::Store(e),
            MetricsError::Repository(msg) => AppError::Internal(msg),
        }
    }
}

/// Cache key of a snapshot slice; `all` when no platform is given.
fn snapshot_key(campaign_id: &str, platform: Option<&str>) -> String {
    format!("metrics:{}:{}", campaign_id, platform.unwrap_or("all"))
}

/// MetricsService implementation
pub struct MetricsServiceImpl<R: MetricsRepository> {
    repository: Arc<R>,
    cache: CacheService,
    pubsub: Arc<PubSubRegistry>,
    cache_ttl: u64,
}

impl<R: MetricsRepository> MetricsServiceImpl<R> {
    pub fn new(
        repository: Arc<R>,
        cache: CacheService,
        pubsub: Arc<PubSubRegistry>,
        cache_ttl: u64,
    ) -> Self {
        Self {
            repository,
            cache,
            pubsub,
            cache_ttl,
        }
    }

    async fn cached_latest(
        &self,
        campaign_id: &str,
        platform: Option<&str>,
    ) -> Result<Vec<MetricUpdate>, MetricsError> {
        let repository = Arc::clone(&self.repository);
        let campaign = campaign_id.to_string();
        let platform_owned = platform.map(str::to_string);
        self.cache
            .remember(&snapshot_key(campaign_id, platform), self.cache_ttl, || async move {
                repository
                    .latest(&campaign, platform_owned)
                    .await
                    .map_err(|e| MetricsError::Repository(e.to_string()))
            })
            .await
    }
}

#[async_trait]
impl<R: MetricsRepository + 'static> MetricsService for MetricsServiceImpl<R> {
    #[instrument(skip(self, metrics))]
    async fn ingest(
        &self,
        campaign_id: &str,
        platform: &str,
        metrics: MetricValues,
    ) -> Result<IngestOutcome, MetricsError> {
        let update = MetricUpdate::new(campaign_id, platform, metrics);

        self.repository
            .upsert(&update)
            .await
            .map_err(|e| MetricsError::Repository(e.to_string()))?;

        // Stale snapshots are only a freshness problem, never fatal
        if let Err(e) = self
            .cache
            .invalidate_pattern(&format!("metrics:{}:*", escape_glob(campaign_id)))
            .await
        {
            warn!(campaign_id, error = %e, "Failed to invalidate cached snapshots");
        }

        let receivers = self.pubsub.publish(&update.key().channel(), &update).await?;
        Ok(IngestOutcome { update, receivers })
    }

    #[instrument(skip(self))]
    async fn snapshot(&self, filter: &SubscriptionFilter) -> Result<Vec<MetricUpdate>, MetricsError> {
        let mut updates = Vec::new();
        for campaign_id in &filter.campaign_ids {
            if filter.platforms.is_empty() {
                updates.extend(self.cached_latest(campaign_id, None).await?);
            } else {
                for platform in &filter.platforms {
                    updates.extend(self.cached_latest(campaign_id, Some(platform)).await?);
                }
            }
        }
        Ok(updates)
    }
}
