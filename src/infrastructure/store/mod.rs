//! Store Module
//!
//! Primitive operations of the shared key-value store and the connectors
//! that open connections to it.
//!
//! This module provides:
//! - A `KeyValueStore` trait with the string, counter, sorted-set and
//!   publish primitives every higher-level component is built on
//! - A `SubscriberConnection` trait for the dedicated subscribe connection
//! - A `StoreConnector` trait that opens the three logical connections
//! - Redis and in-memory implementations of all three
//! - `Namespace`, the reserved key prefix of each subsystem
//!
//! # Architecture
//!
//! ```text
//! +-------------------+     +-------------------+
//! | Cache / Sessions  |     |   Rate Limiter    |
//! +-------------------+     +-------------------+
//!          |                          |
//!          v                          v
//! +---------------------------------------------+
//! |        StoreManager (connection.rs)         |
//! +---------------------------------------------+
//!          |                          |
//!          v                          v
//! +-------------------+     +-------------------+
//! |  KeyValueStore    |     | SubscriberConn.   |
//! +-------------------+     +-------------------+
//!          |                          |
//!          v                          v
//! +---------------------------------------------+
//! |   RedisConnector  |  MemoryConnector        |
//! +---------------------------------------------+
//! ```

mod memory;
mod namespace;
mod redis_store;

pub use memory::{glob_match, MemoryConnector};
pub use namespace::{escape_glob, Namespace};
pub use redis_store::RedisConnector;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

/// Errors raised by store primitives.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store is not connected")]
    NotConnected,

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Command error: {0}")]
    Command(String),
}

/// A message received on the subscribe connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Channel the message was published on
    pub channel: String,
    /// Pattern that matched, when delivered through a pattern subscription
    pub pattern: Option<String>,
    /// Raw (serialized) payload
    pub payload: String,
}

/// Sender half the subscribe connection forwards incoming messages into.
pub type MessageSink = mpsc::UnboundedSender<BrokerMessage>;

/// Host/port/db of the store, reported by health checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub db: i64,
}

/// Primitive key-value operations. Each call is a single round trip and is
/// atomic at the store level; sequences of calls are not.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Round-trip liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Human readable used-memory figure, if the store reports one.
    async fn memory_info(&self) -> Result<Option<String>, StoreError>;

    /// Number of keys in the selected database.
    async fn dbsize(&self) -> Result<u64, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes `value`; `ttl` of `None` or `Some(0)` means no expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<u64>) -> Result<(), StoreError>;

    /// Writes `value` only if `key` is absent; true if this call created it.
    async fn set_nx(&self, key: &str, value: String, ttl: Option<u64>)
        -> Result<bool, StoreError>;

    /// Deletes keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Sets a TTL on an existing key; false if the key does not exist.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StoreError>;

    /// Remaining TTL in seconds: -2 if missing, -1 if the key has no expiry.
    async fn ttl(&self, key: &str) -> Result<i64, StoreError>;

    /// Atomically adds `delta`, creating the key at 0 first if needed.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// `incr_by` plus an expiry of `ttl_secs` in the same atomic step. The
    /// expiry is applied when this call created the key, or when the key
    /// somehow has none; a running expiry is never extended.
    async fn incr_with_expiry(&self, key: &str, delta: i64, ttl_secs: u64)
        -> Result<i64, StoreError>;

    /// All keys matching a glob pattern (non-atomic incremental scan).
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Adds `member` to a sorted set with `score`.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError>;

    /// Removes sorted-set members with score strictly below `max_exclusive`.
    async fn zrem_range_below(&self, key: &str, max_exclusive: i64) -> Result<u64, StoreError>;

    async fn zcard(&self, key: &str) -> Result<u64, StoreError>;

    /// Publishes a message; returns the number of receiving subscriptions.
    async fn publish(&self, channel: &str, payload: &str) -> Result<u64, StoreError>;
}

/// The dedicated subscribe connection. Messages arrive on the sink the
/// connection was opened with.
#[async_trait]
pub trait SubscriberConnection: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<(), StoreError>;

    async fn unsubscribe(&self, channel: &str) -> Result<(), StoreError>;

    async fn psubscribe(&self, pattern: &str) -> Result<(), StoreError>;

    async fn punsubscribe(&self, pattern: &str) -> Result<(), StoreError>;

    /// Stops message delivery and releases the connection.
    async fn close(&self);

    /// Resolves once the connection stops delivering messages, whether it
    /// was closed locally or dropped by the server.
    async fn closed(&self);
}

/// Opens the three logical connections (command, publish, subscribe).
#[async_trait]
pub trait StoreConnector: Send + Sync {
    fn endpoint(&self) -> Endpoint;

    async fn open_command(&self) -> Result<Arc<dyn KeyValueStore>, StoreError>;

    async fn open_publisher(&self) -> Result<Arc<dyn KeyValueStore>, StoreError>;

    async fn open_subscriber(
        &self,
        sink: MessageSink,
    ) -> Result<Arc<dyn SubscriberConnection>, StoreError>;
}
