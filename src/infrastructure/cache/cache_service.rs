//! Cache Service
//!
//! Typed, namespaced cache-aside operations on top of the store's command
//! connection.
//!
//! Read paths (`get`, `exists`, `ttl`) fail soft: a store or decode error is
//! logged and reported as a miss so a degraded store never blocks callers.
//! Write paths (`set`, `incr`, `set_nx`, ...) propagate errors and leave the
//! retry decision to the caller.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::infrastructure::connection::StoreManager;
use crate::infrastructure::metrics;
use crate::infrastructure::store::{Namespace, StoreError};

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

/// Usage statistics of a cache namespace plus store-wide figures.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub namespace: String,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletes: u64,
    pub errors: u64,
    /// Keys in the whole store (DBSIZE)
    pub keys: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Namespaced cache over the shared store.
#[derive(Clone)]
pub struct CacheService {
    manager: Arc<StoreManager>,
    namespace: Namespace,
    counters: Arc<Counters>,
}

impl CacheService {
    pub fn new(manager: Arc<StoreManager>, namespace: Namespace) -> Self {
        Self {
            manager,
            namespace,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    fn record(&self, result: &str) {
        metrics::record_cache_lookup(self.namespace.prefix().trim_end_matches(':'), result);
    }

    fn fail(&self, op: &str, key: &str, e: &StoreError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        error!(op, key, error = %e, "Cache operation failed");
    }

    /// Serializes and writes `value`; `ttl_secs` of 0 means no expiry.
    #[instrument(skip(self, value), level = "debug")]
    pub async fn set<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let data = serde_json::to_string(value)?;
        let full_key = self.namespace.key(key);
        let result = async {
            self.manager
                .command()
                .await?
                .set(&full_key, data, Some(ttl_secs))
                .await
        }
        .await;

        match result {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                debug!(key = %full_key, "Cache set");
                Ok(())
            }
            Err(e) => {
                self.fail("set", &full_key, &e);
                Err(e)
            }
        }
    }

    /// Cached value, or `None` on miss, store error or decode failure.
    #[instrument(skip(self), level = "debug")]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full_key = self.namespace.key(key);
        let raw = async { self.manager.command().await?.get(&full_key).await }.await;

        match raw {
            Ok(Some(data)) => match serde_json::from_str(&data) {
                Ok(value) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    self.record("hit");
                    debug!(key = %full_key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    self.record("miss");
                    warn!(key = %full_key, error = %e, "Cache deserialization error, treating as miss");
                    None
                }
            },
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.record("miss");
                debug!(key = %full_key, "Cache miss");
                None
            }
            Err(e) => {
                self.record("error");
                self.fail("get", &full_key, &e);
                None
            }
        }
    }

    /// Deletes a key; returns the number of keys removed.
    pub async fn del(&self, key: &str) -> Result<u64, StoreError> {
        self.del_full(vec![self.namespace.key(key)]).await
    }

    async fn del_full(&self, keys: Vec<String>) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        match async { self.manager.command().await?.del(&keys).await }.await {
            Ok(deleted) => {
                self.counters.deletes.fetch_add(deleted, Ordering::Relaxed);
                Ok(deleted)
            }
            Err(e) => {
                self.fail("del", &keys.join(","), &e);
                Err(e)
            }
        }
    }

    /// Whether the key is present; false on store error.
    pub async fn exists(&self, key: &str) -> bool {
        let full_key = self.namespace.key(key);
        match async { self.manager.command().await?.exists(&full_key).await }.await {
            Ok(exists) => exists,
            Err(e) => {
                self.fail("exists", &full_key, &e);
                false
            }
        }
    }

    /// Sets a TTL on an existing key; false if it does not exist.
    pub async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        let full_key = self.namespace.key(key);
        let result = async { self.manager.command().await?.expire(&full_key, ttl_secs).await }.await;
        result.inspect_err(|e| self.fail("expire", &full_key, e))
    }

    /// Remaining TTL in seconds; -2 for a missing key, -1 for no expiry or
    /// when the store cannot be reached.
    pub async fn ttl(&self, key: &str) -> i64 {
        let full_key = self.namespace.key(key);
        match async { self.manager.command().await?.ttl(&full_key).await }.await {
            Ok(ttl) => ttl,
            Err(e) => {
                self.fail("ttl", &full_key, &e);
                -1
            }
        }
    }

    /// Atomic increment.
    pub async fn incr(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let full_key = self.namespace.key(key);
        let result = async { self.manager.command().await?.incr_by(&full_key, by).await }.await;
        result.inspect_err(|e| self.fail("incr", &full_key, e))
    }

    /// Writes only if absent; true when this call created the key.
    pub async fn set_nx<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: Option<u64>,
    ) -> Result<bool, StoreError> {
        let data = serde_json::to_string(value)?;
        let full_key = self.namespace.key(key);
        let result =
            async { self.manager.command().await?.set_nx(&full_key, data, ttl_secs).await }.await;
        match result {
            Ok(created) => {
                if created {
                    self.counters.writes.fetch_add(1, Ordering::Relaxed);
                }
                Ok(created)
            }
            Err(e) => {
                self.fail("set_nx", &full_key, &e);
                Err(e)
            }
        }
    }

    /// Cache-aside read. Returns the cached value when present; otherwise
    /// runs `producer`, caches its result and returns it.
    ///
    /// Concurrent misses on the same key may each run `producer`. A failed
    /// cache write is logged and the produced value is still returned.
    pub async fn remember<T, E, F, Fut>(&self, key: &str, ttl_secs: u64, producer: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(key).await {
            return Ok(cached);
        }

        let value = producer().await?;
        if let Err(e) = self.set(key, &value, ttl_secs).await {
            warn!(key, error = %e, "Failed to cache produced value");
        }
        Ok(value)
    }

    /// Deletes every key in this namespace matching `pattern`.
    ///
    /// Not atomic: keys written between the scan and the delete may survive.
    #[instrument(skip(self))]
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let full_pattern = self.namespace.key(pattern);
        let keys = async { self.manager.command().await?.scan_keys(&full_pattern).await }
            .await
            .inspect_err(|e| self.fail("scan", &full_pattern, e))?;
        let deleted = self.del_full(keys).await?;
        debug!(pattern = %full_pattern, deleted, "Cache invalidated");
        Ok(deleted)
    }

    /// Counter snapshot plus store-wide key count and memory usage.
    pub async fn stats(&self) -> Result<CacheStats, StoreError> {
        let command = self.manager.command().await?;
        let keys = command.dbsize().await?;
        let memory = command.memory_info().await?;
        Ok(CacheStats {
            namespace: self.namespace.to_string(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            keys,
            memory,
        })
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
