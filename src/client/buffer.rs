//! Update log and local aggregate

use std::collections::{HashMap, VecDeque};

use uuid::Uuid;

use crate::domain::{CampaignKey, MetricUpdate, MetricValues};

pub const DEFAULT_UPDATE_LOG_CAPACITY: usize = 100;

/// Bounded log of received updates; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct UpdateLog {
    entries: VecDeque<MetricUpdate>,
    capacity: usize,
}

impl UpdateLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, update: MetricUpdate) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(update);
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.iter().any(|u| &u.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &MetricUpdate> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for UpdateLog {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_LOG_CAPACITY)
    }
}

/// What a dashboard renders: merged values per campaign/platform plus the
/// recent update log.
#[derive(Debug, Clone, Default)]
pub struct MetricsView {
    aggregate: HashMap<CampaignKey, MetricValues>,
    log: UpdateLog,
    last_update: Option<i64>,
}

impl MetricsView {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            aggregate: HashMap::new(),
            log: UpdateLog::new(log_capacity),
            last_update: None,
        }
    }

    /// Merges an update into the aggregate. Redelivered updates (same id
    /// still in the log) are ignored and return `false`.
    pub fn apply(&mut self, update: MetricUpdate) -> bool {
        if self.log.contains(&update.id) {
            return false;
        }
        self.aggregate
            .entry(update.key())
            .or_default()
            .extend(update.metrics.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.last_update = Some(chrono::Utc::now().timestamp_millis());
        self.log.push(update);
        true
    }

    pub fn values(&self, campaign_id: &str, platform: &str) -> Option<&MetricValues> {
        self.aggregate.get(&CampaignKey::new(campaign_id, platform))
    }

    pub fn aggregate(&self) -> &HashMap<CampaignKey, MetricValues> {
        &self.aggregate
    }

    pub fn log(&self) -> &UpdateLog {
        &self.log
    }

    /// Local time (ms) of the last applied update
    pub fn last_update(&self) -> Option<i64> {
        self.last_update
    }

    /// Drops aggregate entries whose campaign/platform is no longer followed.
    pub fn retain(&mut self, keep: impl Fn(&str, &str) -> bool) {
        self.aggregate
            .retain(|key, _| keep(&key.campaign_id, &key.platform));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn update(n: i64) -> MetricUpdate {
        MetricUpdate::new(
            "cmp-1",
            "google",
            json!({ "clicks": n }).as_object().cloned().unwrap_or_default(),
        )
    }

    #[test]
    fn test_log_keeps_most_recent_hundred() {
        let mut log = UpdateLog::default();
        for n in 0..150 {
            log.push(update(n));
        }

        assert_eq!(log.len(), 100);
        let clicks: Vec<i64> = log
            .iter()
            .map(|u| u.metrics["clicks"].as_i64().unwrap_or_default())
            .collect();
        assert_eq!(clicks, (50..150).collect::<Vec<_>>());
    }

    #[test]
    fn test_apply_merges_partial_updates() {
        let mut view = MetricsView::default();
        view.apply(update(3));
        let mut spend = update(0);
        spend.metrics = json!({ "spend": 12.5 }).as_object().cloned().unwrap_or_default();
        view.apply(spend);

        let values = view.values("cmp-1", "google").unwrap();
        assert_eq!(values["clicks"], json!(3));
        assert_eq!(values["spend"], json!(12.5));
        assert!(view.last_update().is_some());
        assert_eq!(view.log().len(), 2);
    }

    #[test]
    fn test_apply_ignores_redelivery() {
        let mut view = MetricsView::default();
        let first = update(1);
        assert!(view.apply(first.clone()));
        assert!(!view.apply(first));
        assert_eq!(view.log().len(), 1);
    }

    #[test]
    fn test_retain_by_campaign_and_platform() {
        let mut view = MetricsView::default();
        view.apply(update(1));
        view.apply(MetricUpdate::new(
            "cmp-1",
            "meta",
            json!({ "clicks": 2 }).as_object().cloned().unwrap_or_default(),
        ));

        view.retain(|_, platform| platform != "meta");
        assert!(view.values("cmp-1", "google").is_some());
        assert!(view.values("cmp-1", "meta").is_none());

        view.retain(|campaign, _| campaign != "cmp-1");
        assert!(view.aggregate().is_empty());
    }
}
