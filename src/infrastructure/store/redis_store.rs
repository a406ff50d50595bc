//! Redis Store
//!
//! `KeyValueStore` and `SubscriberConnection` backed by Redis. Command and
//! publish connections are `ConnectionManager`s (automatic reconnection);
//! the subscribe connection is a dedicated `PubSub` connection whose
//! message stream is pumped into the manager's sink by a background task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSubSink};
use redis::{AsyncCommands, Client};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use super::{
    BrokerMessage, Endpoint, KeyValueStore, MessageSink, StoreConnector, StoreError,
    SubscriberConnection,
};
use crate::config::RedisSettings;

/// Number of keys requested per SCAN round trip.
const SCAN_BATCH: usize = 100;

/// INCRBY and EXPIRE as one step, so a counter can never outlive its TTL.
const INCR_WITH_EXPIRY: &str = r#"
local count = redis.call('INCRBY', KEYS[1], ARGV[1])
if tonumber(count) == tonumber(ARGV[1]) or redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return count
"#;

/// Opens Redis connections from a connection URL.
pub struct RedisConnector {
    client: Client,
    endpoint: Endpoint,
    connect_timeout: Duration,
}

impl RedisConnector {
    /// Creates a connector; does not touch the network.
    pub fn new(settings: &RedisSettings) -> Result<Self, StoreError> {
        let client = Client::open(settings.url.as_str())?;
        Ok(Self {
            client,
            endpoint: parse_endpoint(&settings.url),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
        })
    }

    async fn open_manager(&self) -> Result<ConnectionManager, StoreError> {
        let pending = ConnectionManager::new(self.client.clone());
        match tokio::time::timeout(self.connect_timeout, pending).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Connection(format!(
                "timed out after {}ms connecting to {}:{}",
                self.connect_timeout.as_millis(),
                self.endpoint.host,
                self.endpoint.port
            ))),
        }
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    #[instrument(skip(self), fields(host = %self.endpoint.host, port = self.endpoint.port))]
    async fn open_command(&self) -> Result<Arc<dyn KeyValueStore>, StoreError> {
        let conn = self.open_manager().await?;
        info!("Redis command connection established");
        Ok(Arc::new(RedisStore { conn }))
    }

    #[instrument(skip(self), fields(host = %self.endpoint.host, port = self.endpoint.port))]
    async fn open_publisher(&self) -> Result<Arc<dyn KeyValueStore>, StoreError> {
        let conn = self.open_manager().await?;
        info!("Redis publish connection established");
        Ok(Arc::new(RedisStore { conn }))
    }

    #[instrument(skip(self, sink), fields(host = %self.endpoint.host, port = self.endpoint.port))]
    async fn open_subscriber(
        &self,
        sink: MessageSink,
    ) -> Result<Arc<dyn SubscriberConnection>, StoreError> {
        let pubsub = match tokio::time::timeout(
            self.connect_timeout,
            self.client.get_async_pubsub(),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(StoreError::Connection(
                    "timed out opening subscribe connection".into(),
                ))
            }
        };

        let (commands, mut stream) = pubsub.split();
        // dropped with the forwarding task, which wakes `closed()`
        let (alive_tx, alive) = watch::channel(());
        let forward = tokio::spawn(async move {
            let _alive = alive_tx;
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(channel = %msg.get_channel_name(), error = %e, "Dropping non-text pub/sub payload");
                        continue;
                    }
                };
                let pattern = if msg.from_pattern() {
                    msg.get_pattern::<String>().ok()
                } else {
                    None
                };
                let message = BrokerMessage {
                    channel: msg.get_channel_name().to_string(),
                    pattern,
                    payload,
                };
                if sink.send(message).is_err() {
                    break;
                }
            }
            warn!("Redis pub/sub stream ended");
        });

        info!("Redis subscribe connection established");
        Ok(Arc::new(RedisSubscriber {
            commands: Mutex::new(commands),
            forward,
            alive,
        }))
    }
}

/// Command/publish connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn memory_info(&self) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let info: String = redis::cmd("INFO").arg("memory").query_async(&mut conn).await?;
        Ok(parse_used_memory(&info))
    }

    async fn dbsize(&self) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let size: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        Ok(size)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<u64>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(seconds) = ttl.filter(|s| *s > 0) {
            cmd.arg("EX").arg(seconds);
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: String,
        ttl: Option<u64>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        // SET .. NX replies OK when written and nil otherwise
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(seconds) = ttl.filter(|s| *s > 0) {
            cmd.arg("EX").arg(seconds);
        }
        let result: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(result.is_some())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let deleted: u64 = conn.del(keys).await?;
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let result: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn.ttl(key).await?;
        Ok(ttl)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    async fn incr_with_expiry(
        &self,
        key: &str,
        delta: i64,
        ttl_secs: u64,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::Script::new(INCR_WITH_EXPIRY)
            .key(key)
            .arg(delta)
            .arg(ttl_secs.max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn zrem_range_below(&self, key: &str, max_exclusive: i64) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(format!("({}", max_exclusive))
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(key).await?;
        Ok(count)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let receivers: u64 = conn.publish(channel, payload).await?;
        Ok(receivers)
    }
}

/// Subscribe connection: command half plus the forwarding task.
struct RedisSubscriber {
    commands: Mutex<PubSubSink>,
    forward: JoinHandle<()>,
    alive: watch::Receiver<()>,
}

#[async_trait]
impl SubscriberConnection for RedisSubscriber {
    async fn subscribe(&self, channel: &str) -> Result<(), StoreError> {
        self.commands.lock().await.subscribe(channel).await?;
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), StoreError> {
        self.commands.lock().await.unsubscribe(channel).await?;
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<(), StoreError> {
        self.commands.lock().await.psubscribe(pattern).await?;
        Ok(())
    }

    async fn punsubscribe(&self, pattern: &str) -> Result<(), StoreError> {
        self.commands.lock().await.punsubscribe(pattern).await?;
        Ok(())
    }

    async fn close(&self) {
        self.forward.abort();
    }

    async fn closed(&self) {
        let mut alive = self.alive.clone();
        while alive.changed().await.is_ok() {}
    }
}

impl Drop for RedisSubscriber {
    fn drop(&mut self) {
        self.forward.abort();
    }
}

/// Extracts host, port and database index from a `redis://` URL.
fn parse_endpoint(url: &str) -> Endpoint {
    let rest = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let rest = rest.rsplit_once('@').map(|(_, host)| host).unwrap_or(rest);
    let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(6379)),
        None => (authority, 6379),
    };
    let db = path
        .split(['?', '#'])
        .next()
        .and_then(|db| db.parse().ok())
        .unwrap_or(0);

    Endpoint {
        host: if host.is_empty() { "localhost".into() } else { host.to_string() },
        port,
        db,
    }
}

/// Pulls `used_memory_human` out of an `INFO memory` reply.
fn parse_used_memory(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory_human:"))
        .map(|value| value.trim().to_string())
}
