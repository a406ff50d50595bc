//! In-Memory Store
//!
//! Single-process stand-in for Redis: string values with TTLs, sorted sets,
//! glob key scans and a pub/sub bus. Expiry is measured on the tokio clock,
//! so tests can drive it with a paused runtime. Selected with
//! `redis.backend = "memory"` and used by the test suite.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

use super::{
    BrokerMessage, Endpoint, KeyValueStore, MessageSink, StoreConnector, StoreError,
    SubscriberConnection,
};

enum Value {
    Str(String),
    SortedSet(HashMap<String, i64>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn string(value: String, ttl: Option<u64>) -> Self {
        Self {
            value: Value::Str(value),
            expires_at: ttl
                .filter(|s| *s > 0)
                .map(|s| Instant::now() + Duration::from_secs(s)),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct BusSubscriber {
    channels: HashSet<String>,
    patterns: HashSet<String>,
    sink: MessageSink,
    // removing the subscriber from the bus wakes its `closed()`
    _alive: watch::Sender<()>,
}

#[derive(Default)]
struct Bus {
    next_id: u64,
    subscribers: HashMap<u64, BusSubscriber>,
}

struct MemoryState {
    data: Mutex<HashMap<String, Entry>>,
    bus: Mutex<Bus>,
    available: AtomicBool,
}

impl MemoryState {
    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Connection("store unavailable".into()))
        }
    }
}

/// Drops `key` if it has expired, then returns it.
fn live_entry<'a>(data: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if data.get(key).is_some_and(|e| e.is_expired(now)) {
        data.remove(key);
    }
    data.get_mut(key)
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Command(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

/// Connector for the in-memory store. Clones share the same keyspace.
#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<MemoryState>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MemoryState {
                data: Mutex::new(HashMap::new()),
                bus: Mutex::new(Bus::default()),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulates an outage: while unavailable every operation and every
    /// connection attempt fails.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Number of channel and pattern subscriptions held upstream.
    pub fn upstream_subscriptions(&self) -> usize {
        self.state
            .bus
            .lock()
            .subscribers
            .values()
            .map(|s| s.channels.len() + s.patterns.len())
            .sum()
    }

    /// Whether any subscribe connection holds `name` as a channel or pattern.
    pub fn is_subscribed(&self, name: &str) -> bool {
        self.state
            .bus
            .lock()
            .subscribers
            .values()
            .any(|s| s.channels.contains(name) || s.patterns.contains(name))
    }

    /// Simulates the server dropping every subscribe connection. Returns
    /// how many were dropped.
    pub fn drop_subscribe_connections(&self) -> usize {
        let mut bus = self.state.bus.lock();
        let dropped = bus.subscribers.len();
        bus.subscribers.clear();
        dropped
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: "memory".into(),
            port: 0,
            db: 0,
        }
    }

    async fn open_command(&self) -> Result<Arc<dyn KeyValueStore>, StoreError> {
        self.state.check()?;
        Ok(Arc::new(MemoryStore {
            state: Arc::clone(&self.state),
        }))
    }

    async fn open_publisher(&self) -> Result<Arc<dyn KeyValueStore>, StoreError> {
        self.state.check()?;
        Ok(Arc::new(MemoryStore {
            state: Arc::clone(&self.state),
        }))
    }

    async fn open_subscriber(
        &self,
        sink: MessageSink,
    ) -> Result<Arc<dyn SubscriberConnection>, StoreError> {
        self.state.check()?;
        let mut bus = self.state.bus.lock();
        let id = bus.next_id;
        bus.next_id += 1;
        let (alive_tx, alive) = watch::channel(());
        bus.subscribers.insert(
            id,
            BusSubscriber {
                channels: HashSet::new(),
                patterns: HashSet::new(),
                sink,
                _alive: alive_tx,
            },
        );
        Ok(Arc::new(MemorySubscriber {
            id,
            state: Arc::clone(&self.state),
            alive,
        }))
    }
}

struct MemoryStore {
    state: Arc<MemoryState>,
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.state.check()
    }

    async fn memory_info(&self) -> Result<Option<String>, StoreError> {
        self.state.check()?;
        let data = self.state.data.lock();
        let bytes: usize = data
            .iter()
            .map(|(key, entry)| {
                key.len()
                    + match &entry.value {
                        Value::Str(s) => s.len(),
                        Value::SortedSet(set) => set.keys().map(|m| m.len() + 8).sum(),
                    }
            })
            .sum();
        Ok(Some(format!("{}B", bytes)))
    }

    async fn dbsize(&self) -> Result<u64, StoreError> {
        self.state.check()?;
        let now = Instant::now();
        let data = self.state.data.lock();
        Ok(data.values().filter(|e| !e.is_expired(now)).count() as u64)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.state.check()?;
        let mut data = self.state.data.lock();
        match live_entry(&mut data, key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<u64>) -> Result<(), StoreError> {
        self.state.check()?;
        self.state
            .data
            .lock()
            .insert(key.to_string(), Entry::string(value, ttl));
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: String,
        ttl: Option<u64>,
    ) -> Result<bool, StoreError> {
        self.state.check()?;
        let mut data = self.state.data.lock();
        if live_entry(&mut data, key).is_some() {
            return Ok(false);
        }
        data.insert(key.to_string(), Entry::string(value, ttl));
        Ok(true)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.state.check()?;
        let mut data = self.state.data.lock();
        let mut deleted = 0;
        for key in keys {
            if live_entry(&mut data, key).is_some() {
                data.remove(key);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.state.check()?;
        Ok(live_entry(&mut self.state.data.lock(), key).is_some())
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StoreError> {
        self.state.check()?;
        let mut data = self.state.data.lock();
        let Some(entry) = live_entry(&mut data, key) else {
            return Ok(false);
        };
        if seconds == 0 {
            data.remove(key);
        } else {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
        }
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        self.state.check()?;
        let mut data = self.state.data.lock();
        Ok(match live_entry(&mut data, key) {
            None => -2,
            Some(Entry {
                expires_at: None, ..
            }) => -1,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(Instant::now()).as_millis() as i64;
                (remaining + 500) / 1000
            }
        })
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.state.check()?;
        let mut data = self.state.data.lock();
        match live_entry(&mut data, key) {
            Some(entry) => match &mut entry.value {
                Value::Str(s) => {
                    let current: i64 = s.parse().map_err(|_| {
                        StoreError::Command("value is not an integer or out of range".into())
                    })?;
                    let next = current + delta;
                    *s = next.to_string();
                    Ok(next)
                }
                Value::SortedSet(_) => Err(wrong_type(key)),
            },
            None => {
                data.insert(key.to_string(), Entry::string(delta.to_string(), None));
                Ok(delta)
            }
        }
    }

    async fn incr_with_expiry(
        &self,
        key: &str,
        delta: i64,
        ttl_secs: u64,
    ) -> Result<i64, StoreError> {
        self.state.check()?;
        let mut data = self.state.data.lock();
        match live_entry(&mut data, key) {
            Some(entry) => {
                let Value::Str(s) = &mut entry.value else {
                    return Err(wrong_type(key));
                };
                let current: i64 = s.parse().map_err(|_| {
                    StoreError::Command("value is not an integer or out of range".into())
                })?;
                let next = current + delta;
                *s = next.to_string();
                if entry.expires_at.is_none() {
                    entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs.max(1)));
                }
                Ok(next)
            }
            None => {
                data.insert(
                    key.to_string(),
                    Entry::string(delta.to_string(), Some(ttl_secs.max(1))),
                );
                Ok(delta)
            }
        }
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.state.check()?;
        let now = Instant::now();
        let data = self.state.data.lock();
        let mut keys: Vec<String> = data
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        self.state.check()?;
        let mut data = self.state.data.lock();
        match live_entry(&mut data, key) {
            Some(Entry {
                value: Value::SortedSet(set),
                ..
            }) => {
                set.insert(member.to_string(), score);
            }
            Some(_) => return Err(wrong_type(key)),
            None => {
                let mut set = HashMap::new();
                set.insert(member.to_string(), score);
                data.insert(
                    key.to_string(),
                    Entry {
                        value: Value::SortedSet(set),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn zrem_range_below(&self, key: &str, max_exclusive: i64) -> Result<u64, StoreError> {
        self.state.check()?;
        let mut data = self.state.data.lock();
        let (removed, now_empty) = match live_entry(&mut data, key) {
            Some(Entry {
                value: Value::SortedSet(set),
                ..
            }) => {
                let before = set.len();
                set.retain(|_, score| *score >= max_exclusive);
                ((before - set.len()) as u64, set.is_empty())
            }
            Some(_) => return Err(wrong_type(key)),
            None => (0, false),
        };
        // Redis drops sorted sets that become empty
        if now_empty {
            data.remove(key);
        }
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        self.state.check()?;
        let mut data = self.state.data.lock();
        match live_entry(&mut data, key) {
            Some(Entry {
                value: Value::SortedSet(set),
                ..
            }) => Ok(set.len() as u64),
            Some(_) => Err(wrong_type(key)),
            None => Ok(0),
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<u64, StoreError> {
        self.state.check()?;
        let bus = self.state.bus.lock();
        let mut receivers = 0;
        for subscriber in bus.subscribers.values() {
            if subscriber.channels.contains(channel) {
                let message = BrokerMessage {
                    channel: channel.to_string(),
                    pattern: None,
                    payload: payload.to_string(),
                };
                if subscriber.sink.send(message).is_ok() {
                    receivers += 1;
                }
            }
            for pattern in subscriber.patterns.iter().filter(|p| glob_match(p, channel)) {
                let message = BrokerMessage {
                    channel: channel.to_string(),
                    pattern: Some(pattern.clone()),
                    payload: payload.to_string(),
                };
                if subscriber.sink.send(message).is_ok() {
                    receivers += 1;
                }
            }
        }
        Ok(receivers)
    }
}

struct MemorySubscriber {
    id: u64,
    state: Arc<MemoryState>,
    alive: watch::Receiver<()>,
}

impl MemorySubscriber {
    fn update(&self, f: impl FnOnce(&mut BusSubscriber)) -> Result<(), StoreError> {
        self.state.check()?;
        let mut bus = self.state.bus.lock();
        match bus.subscribers.get_mut(&self.id) {
            Some(subscriber) => {
                f(subscriber);
                Ok(())
            }
            None => Err(StoreError::Connection("subscribe connection closed".into())),
        }
    }
}

#[async_trait]
impl SubscriberConnection for MemorySubscriber {
    async fn subscribe(&self, channel: &str) -> Result<(), StoreError> {
        self.update(|s| {
            s.channels.insert(channel.to_string());
        })
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), StoreError> {
        self.update(|s| {
            s.channels.remove(channel);
        })
    }

    async fn psubscribe(&self, pattern: &str) -> Result<(), StoreError> {
        self.update(|s| {
            s.patterns.insert(pattern.to_string());
        })
    }

    async fn punsubscribe(&self, pattern: &str) -> Result<(), StoreError> {
        self.update(|s| {
            s.patterns.remove(pattern);
        })
    }

    async fn close(&self) {
        self.state.bus.lock().subscribers.remove(&self.id);
    }

    async fn closed(&self) {
        let mut alive = self.alive.clone();
        while alive.changed().await.is_ok() {}
    }
}

impl Drop for MemorySubscriber {
    fn drop(&mut self) {
        self.state.bus.lock().subscribers.remove(&self.id);
    }
}

/// Redis-style glob matching: `*`, `?`, `[abc]`, `[^a-z]` and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    // Resume point of the most recent `*`: (pattern index after it, text index)
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        let step = if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi + 1, ti));
                    pi += 1;
                    continue;
                }
                '?' => Some(pi + 1),
                '[' => match match_class(&p, pi, t[ti]) {
                    Some((true, next)) => Some(next),
                    Some((false, _)) => None,
                    None => (t[ti] == '[').then_some(pi + 1),
                },
                '\\' if pi + 1 < p.len() => (p[pi + 1] == t[ti]).then_some(pi + 2),
                c => (c == t[ti]).then_some(pi + 1),
            }
        } else {
            None
        };

        match step {
            Some(next) => {
                pi = next;
                ti += 1;
            }
            None => match star {
                Some((resume, consumed)) => {
                    pi = resume;
                    ti = consumed + 1;
                    star = Some((resume, consumed + 1));
                }
                None => return false,
            },
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Matches `c` against the class starting at `p[start] == '['`.
/// Returns `(matched, index after ']')`, or `None` if the class is unterminated.
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = p.get(i) == Some(&'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    while i < p.len() && p[i] != ']' {
        if p[i] == '\\' && i + 1 < p.len() {
            matched |= p[i + 1] == c;
            i += 2;
        } else if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            matched |= p[i] <= c && c <= p[i + 2];
            i += 3;
        } else {
            matched |= p[i] == c;
            i += 1;
        }
    }
    if i >= p.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}
