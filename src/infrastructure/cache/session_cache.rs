//! Session Store
//!
//! TTL-backed session records in the `session:` namespace. Payloads are JSON
//! objects; updates merge shallowly into the stored object.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use super::CacheService;
use crate::infrastructure::connection::StoreManager;
use crate::infrastructure::store::{Namespace, StoreError};

/// Session payload
pub type SessionData = Map<String, Value>;

/// Session store built on a `session:` namespaced cache.
#[derive(Clone, Debug)]
pub struct SessionStore {
    cache: CacheService,
    default_ttl: u64,
}

impl SessionStore {
    pub fn new(manager: Arc<StoreManager>, default_ttl: u64) -> Self {
        Self {
            cache: CacheService::new(manager, Namespace::Session),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    /// Writes a new session, replacing any existing one with the same id.
    pub async fn create(
        &self,
        session_id: &str,
        data: &SessionData,
        ttl: Option<u64>,
    ) -> Result<(), StoreError> {
        self.cache
            .set(session_id, data, ttl.unwrap_or(self.default_ttl))
            .await?;
        debug!(session_id, "Session created");
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionData> {
        self.cache.get(session_id).await
    }

    /// Merges `partial` into an existing session.
    ///
    /// Returns `false` without writing if the session does not exist. Without
    /// an explicit `ttl` the session keeps its remaining lifetime, or gets the
    /// default when that cannot be determined.
    pub async fn update(
        &self,
        session_id: &str,
        partial: SessionData,
        ttl: Option<u64>,
    ) -> Result<bool, StoreError> {
        let Some(mut current) = self.get(session_id).await else {
            return Ok(false);
        };
        current.extend(partial);

        let ttl = match ttl {
            Some(ttl) => ttl,
            None => match self.cache.ttl(session_id).await {
                remaining if remaining > 0 => remaining as u64,
                _ => self.default_ttl,
            },
        };

        self.cache.set(session_id, &current, ttl).await?;
        Ok(true)
    }

    pub async fn destroy(&self, session_id: &str) -> Result<bool, StoreError> {
        let deleted = self.cache.del(session_id).await?;
        debug!(session_id, deleted, "Session destroyed");
        Ok(deleted > 0)
    }

    /// Remaining lifetime in seconds; negative when absent or unknown.
    pub async fn ttl(&self, session_id: &str) -> i64 {
        self.cache.ttl(session_id).await
    }

    /// Extends a session's lifetime without rewriting it; false if absent.
    pub async fn refresh(&self, session_id: &str, ttl: Option<u64>) -> Result<bool, StoreError> {
        self.cache
            .expire(session_id, ttl.unwrap_or(self.default_ttl))
            .await
    }
}
