//! Rate Limiter
//!
//! Distributed request limiting on the shared store with two algorithms:
//!
//! - **Fixed window**: one counter per `(key, windowStart)` in the
//!   `ratelimit:` namespace. The counter's expiry is set atomically with the
//!   increment that creates it, so it disappears when its window ends. A request
//!   landing on a new window boundary starts a fresh count; bursts of up to
//!   twice the limit are possible across a boundary.
//! - **Sliding window**: a sorted-set log per key in the `sliding:`
//!   namespace, scored by request time. Entries older than the window are
//!   evicted before the new entry is added and the log is counted.
//!
//! Both algorithms fail open: if the store errors, the request is allowed
//! with `remaining == limit` and a warning is logged.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::infrastructure::connection::StoreManager;
use crate::infrastructure::metrics;
use crate::infrastructure::store::{Namespace, StoreError};

/// Outcome of a fixed window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix time (ms) at which the current window ends
    pub reset_time: i64,
}

#[derive(Clone)]
pub struct RateLimiter {
    manager: Arc<StoreManager>,
}

impl RateLimiter {
    pub fn new(manager: Arc<StoreManager>) -> Self {
        Self { manager }
    }

    /// Fixed window check at the current wall clock time.
    pub async fn check_rate_limit(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
    ) -> RateLimitDecision {
        self.check_rate_limit_at(key, limit, window_secs, now_ms())
            .await
    }

    pub async fn check_rate_limit_at(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        now_ms: i64,
    ) -> RateLimitDecision {
        let window_ms = (window_secs.max(1) * 1000) as i64;
        let window_start = now_ms.div_euclid(window_ms) * window_ms;
        let reset_time = window_start + window_ms;

        match self.count_fixed(key, window_start, reset_time, now_ms).await {
            Ok(count) => {
                let allowed = count <= limit as i64;
                let remaining = (limit as i64 - count).max(0) as u32;
                metrics::record_rate_limit("fixed", if allowed { "allowed" } else { "denied" });
                debug!(key, count, limit, allowed, "Fixed window check");
                RateLimitDecision {
                    allowed,
                    limit,
                    remaining,
                    reset_time,
                }
            }
            Err(e) => {
                metrics::record_rate_limit("fixed", "fail_open");
                warn!(key, error = %e, "Rate limit check failed, allowing request");
                RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset_time,
                }
            }
        }
    }

    async fn count_fixed(
        &self,
        key: &str,
        window_start: i64,
        reset_time: i64,
        now_ms: i64,
    ) -> Result<i64, StoreError> {
        let counter = Namespace::RateLimit.key(&format!("{}:{}", key, window_start));
        let command = self.manager.command().await?;

        // Round up so the counter outlives its window rather than the reverse
        let ttl_secs = ((reset_time - now_ms) as u64).div_ceil(1000).max(1);
        command.incr_with_expiry(&counter, 1, ttl_secs).await
    }

    /// Sliding window check at the current wall clock time.
    pub async fn check_sliding_window(&self, key: &str, limit: u32, window_secs: u64) -> bool {
        self.check_sliding_window_at(key, limit, window_secs, now_ms())
            .await
    }

    pub async fn check_sliding_window_at(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        now_ms: i64,
    ) -> bool {
        match self.count_sliding(key, window_secs, now_ms).await {
            Ok(count) => {
                let allowed = count <= limit as u64;
                metrics::record_rate_limit("sliding", if allowed { "allowed" } else { "denied" });
                debug!(key, count, limit, allowed, "Sliding window check");
                allowed
            }
            Err(e) => {
                metrics::record_rate_limit("sliding", "fail_open");
                warn!(key, error = %e, "Sliding window check failed, allowing request");
                true
            }
        }
    }

    async fn count_sliding(
        &self,
        key: &str,
        window_secs: u64,
        now_ms: i64,
    ) -> Result<u64, StoreError> {
        let log = Namespace::Sliding.key(key);
        let window_ms = (window_secs * 1000) as i64;
        let command = self.manager.command().await?;

        command.zrem_range_below(&log, now_ms - window_ms).await?;
        // Unique member so same-millisecond requests are all recorded
        let member = format!("{}:{}", now_ms, Uuid::new_v4());
        command.zadd(&log, &member, now_ms).await?;
        command.expire(&log, window_secs.max(1)).await?;
        command.zcard(&log).await
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
