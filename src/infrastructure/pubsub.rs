//! Pub/Sub Registry
//!
//! Fans messages from the store's single subscribe connection out to local
//! handlers.
//!
//! ## How It Works
//!
//! ```text
//! subscribe("metrics:c1:google", h1)  -> SUBSCRIBE upstream (first handler)
//! subscribe("metrics:c1:google", h2)  -> local only
//! unsubscribe("metrics:c1:google", h1) -> local only
//! unsubscribe("metrics:c1:google", h2) -> UNSUBSCRIBE upstream (last handler)
//! ```
//!
//! Incoming messages are decoded once and handed to every handler of the
//! channel (or pattern) in subscription order. One message is fully
//! dispatched before the next is taken, and a failing or panicking handler
//! does not stop the others.
//!
//! Upstream subscriptions belong to one subscribe connection. A supervisor
//! task replays every channel and pattern onto each new connection, whether
//! it came from a reconnect or from reopening a connection the server
//! dropped.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::infrastructure::connection::StoreManager;
use crate::infrastructure::metrics;
use crate::infrastructure::store::{BrokerMessage, StoreError, SubscriberConnection};

const RESTORE_BACKOFF_MIN: Duration = Duration::from_secs(1);
const RESTORE_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// A decoded message delivered to handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub channel: String,
    /// Pattern the handler subscribed with, for pattern deliveries
    pub pattern: Option<String>,
    /// JSON payload; non-JSON payloads arrive as a JSON string
    pub payload: Value,
}

impl ChannelMessage {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

/// Local message handler
pub type MessageHandler = Arc<dyn Fn(&ChannelMessage) -> anyhow::Result<()> + Send + Sync>;

/// Handle identifying one local subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Channel,
    Pattern,
}

type Handlers = Vec<(SubscriptionId, MessageHandler)>;

#[derive(Default)]
struct Subscriptions {
    handlers: HashMap<(Kind, String), Handlers>,
    /// Subscribe connection generation the upstream subscriptions live on
    generation: u64,
}

pub struct PubSubRegistry {
    manager: Arc<StoreManager>,
    subscriptions: Mutex<Subscriptions>,
    next_id: AtomicU64,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl PubSubRegistry {
    /// Creates the registry and starts its dispatch loop over the manager's
    /// incoming message stream. Only one registry can exist per manager.
    pub fn new(manager: Arc<StoreManager>) -> Result<Arc<Self>, StoreError> {
        let mut incoming = manager.take_incoming().ok_or_else(|| {
            StoreError::Connection("incoming message stream already taken".into())
        })?;

        let registry = Arc::new(Self {
            manager: Arc::clone(&manager),
            subscriptions: Mutex::new(Subscriptions::default()),
            next_id: AtomicU64::new(1),
            tasks: parking_lot::Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&registry);
        let dispatcher = tokio::spawn(async move {
            while let Some(message) = incoming.recv().await {
                let Some(registry) = weak.upgrade() else {
                    break;
                };
                registry.dispatch(message).await;
            }
            debug!("Pub/sub dispatch loop stopped");
        });
        let supervisor = tokio::spawn(supervise(Arc::downgrade(&registry), manager));
        registry.tasks.lock().extend([dispatcher, supervisor]);

        Ok(registry)
    }

    /// Adds `handler` to `channel`, subscribing upstream on the first one.
    pub async fn subscribe(
        &self,
        channel: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, StoreError> {
        self.add(Kind::Channel, channel, handler).await
    }

    /// Adds `handler` for a glob `pattern`, subscribing upstream on the first one.
    pub async fn psubscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, StoreError> {
        self.add(Kind::Pattern, pattern, handler).await
    }

    /// Removes one handler, or every handler when `id` is `None`. The upstream
    /// subscription is dropped once no handler remains. Returns how many
    /// handlers were removed.
    pub async fn unsubscribe(&self, channel: &str, id: Option<SubscriptionId>) -> usize {
        self.remove(Kind::Channel, channel, id).await
    }

    pub async fn punsubscribe(&self, pattern: &str, id: Option<SubscriptionId>) -> usize {
        self.remove(Kind::Pattern, pattern, id).await
    }

    async fn add(
        &self,
        kind: Kind,
        name: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, StoreError> {
        let mut subscriptions = self.subscriptions.lock().await;
        let key = (kind, name.to_string());

        let (subscriber, generation) = self.manager.subscriber_session().await?;
        resync(&mut subscriptions, subscriber.as_ref(), generation).await?;

        if !subscriptions.handlers.contains_key(&key) {
            subscribe_upstream(subscriber.as_ref(), kind, name).await?;
            info!(name, ?kind, "Subscribed upstream");
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        subscriptions.handlers.entry(key).or_default().push((id, handler));
        Ok(id)
    }

    async fn remove(&self, kind: Kind, name: &str, id: Option<SubscriptionId>) -> usize {
        let mut subscriptions = self.subscriptions.lock().await;
        let key = (kind, name.to_string());

        let Some(handlers) = subscriptions.handlers.get_mut(&key) else {
            return 0;
        };
        let before = handlers.len();
        match id {
            Some(id) => handlers.retain(|(existing, _)| *existing != id),
            None => handlers.clear(),
        }
        let removed = before - handlers.len();

        if handlers.is_empty() {
            subscriptions.handlers.remove(&key);
            let result = async {
                let subscriber = self.manager.subscriber().await?;
                match kind {
                    Kind::Channel => subscriber.unsubscribe(name).await,
                    Kind::Pattern => subscriber.punsubscribe(name).await,
                }
            }
            .await;
            match result {
                Ok(()) => info!(name, ?kind, "Unsubscribed upstream"),
                Err(e) => warn!(name, ?kind, error = %e, "Failed to unsubscribe upstream"),
            }
        }

        removed
    }

    /// Serializes `message` once and publishes it. Returns the number of
    /// subscribed connections the store delivered it to.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        channel: &str,
        message: &T,
    ) -> Result<u64, StoreError> {
        let payload = serde_json::to_string(message)?;
        let receivers = self
            .manager
            .publisher()
            .await?
            .publish(channel, &payload)
            .await?;
        metrics::record_pubsub("published");
        debug!(channel, receivers, "Published message");
        Ok(receivers)
    }

    /// Delivers one upstream message to its local handlers and returns how
    /// many of them completed successfully.
    pub async fn dispatch(&self, message: BrokerMessage) -> usize {
        let key = match &message.pattern {
            Some(pattern) => (Kind::Pattern, pattern.clone()),
            None => (Kind::Channel, message.channel.clone()),
        };

        let handlers: Vec<MessageHandler> = {
            let subscriptions = self.subscriptions.lock().await;
            match subscriptions.handlers.get(&key) {
                Some(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return 0,
            }
        };

        let payload = serde_json::from_str(&message.payload)
            .unwrap_or_else(|_| Value::String(message.payload.clone()));
        let decoded = ChannelMessage {
            channel: message.channel,
            pattern: message.pattern,
            payload,
        };

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&decoded))) {
                Ok(Ok(())) => {
                    delivered += 1;
                    metrics::record_pubsub("dispatched");
                }
                Ok(Err(e)) => {
                    metrics::record_pubsub("handler_error");
                    error!(channel = %decoded.channel, error = %e, "Pub/sub handler failed");
                }
                Err(_) => {
                    metrics::record_pubsub("handler_error");
                    error!(channel = %decoded.channel, "Pub/sub handler panicked");
                }
            }
        }
        delivered
    }

    /// Number of local handlers for a channel.
    pub async fn handler_count(&self, channel: &str) -> usize {
        self.subscriptions
            .lock()
            .await
            .handlers
            .get(&(Kind::Channel, channel.to_string()))
            .map_or(0, Vec::len)
    }

    /// Number of channels and patterns with at least one handler.
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.handlers.len()
    }

    async fn sync(&self, subscriber: &dyn SubscriberConnection, generation: u64) {
        let mut subscriptions = self.subscriptions.lock().await;
        if let Err(e) = resync(&mut subscriptions, subscriber, generation).await {
            warn!(error = %e, "Failed to restore upstream subscriptions");
        }
    }
}

impl Drop for PubSubRegistry {
    fn drop(&mut self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

async fn subscribe_upstream(
    subscriber: &dyn SubscriberConnection,
    kind: Kind,
    name: &str,
) -> Result<(), StoreError> {
    match kind {
        Kind::Channel => subscriber.subscribe(name).await,
        Kind::Pattern => subscriber.psubscribe(name).await,
    }
}

/// Replays every channel and pattern onto `subscriber` unless they already
/// live on that generation. Left unsynced on failure so the next call retries.
async fn resync(
    subscriptions: &mut Subscriptions,
    subscriber: &dyn SubscriberConnection,
    generation: u64,
) -> Result<(), StoreError> {
    if subscriptions.generation == generation {
        return Ok(());
    }
    for (kind, name) in subscriptions.handlers.keys() {
        subscribe_upstream(subscriber, *kind, name).await?;
    }
    if !subscriptions.handlers.is_empty() {
        info!(
            restored = subscriptions.handlers.len(),
            generation, "Restored upstream subscriptions"
        );
    }
    subscriptions.generation = generation;
    Ok(())
}

/// Keeps upstream subscriptions attached to whatever subscribe connection
/// the manager currently holds. Reopens the connection with capped
/// exponential backoff when the server drops it.
async fn supervise(registry: Weak<PubSubRegistry>, manager: Arc<StoreManager>) {
    let mut state = manager.watch_state();
    loop {
        let Ok((subscriber, generation)) = manager.subscriber_session().await else {
            if state.changed().await.is_err() {
                break;
            }
            continue;
        };

        match registry.upgrade() {
            Some(registry) => registry.sync(subscriber.as_ref(), generation).await,
            None => break,
        }

        let lost = tokio::select! {
            _ = subscriber.closed() => true,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                false
            }
        };
        drop(subscriber);
        if lost {
            restore(&manager, generation).await;
        }
    }
    debug!("Pub/sub supervisor stopped");
}

async fn restore(manager: &StoreManager, lost: u64) {
    let mut backoff = RESTORE_BACKOFF_MIN;
    loop {
        match manager.restore_subscriber(lost).await {
            Ok(_) => return,
            Err(e) => {
                warn!(error = %e, retry_in_ms = backoff.as_millis() as u64, "Retrying subscribe connection");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RESTORE_BACKOFF_MAX);
            }
        }
    }
}
