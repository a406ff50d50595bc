//! Store Connection Lifecycle
//!
//! `StoreManager` is the process-wide owner of the three logical store
//! connections (command, publish, subscribe). Every other component reaches
//! the store through it and observes its `ConnectionState`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::signal;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{error, info, instrument, warn};

use super::store::{
    BrokerMessage, KeyValueStore, StoreConnector, StoreError, SubscriberConnection,
};

/// Connectivity of the shared store. Exactly one value at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthDetails {
    pub connection: ConnectionState,
    pub host: String,
    pub port: u16,
    pub db: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a live health probe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub details: HealthDetails,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

struct Connections {
    command: Arc<dyn KeyValueStore>,
    publisher: Arc<dyn KeyValueStore>,
    subscriber: Arc<dyn SubscriberConnection>,
    /// Bumped whenever a new subscribe connection is opened
    generation: u64,
}

/// Owner of the store connections.
pub struct StoreManager {
    connector: Arc<dyn StoreConnector>,
    connections: RwLock<Option<Connections>>,
    connect_lock: Mutex<()>,
    state: watch::Sender<ConnectionState>,
    incoming_tx: mpsc::UnboundedSender<BrokerMessage>,
    incoming_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<BrokerMessage>>>,
    generation: AtomicU64,
    shut_down: AtomicBool,
}

impl StoreManager {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            connections: RwLock::new(None),
            connect_lock: Mutex::new(()),
            state,
            incoming_tx,
            incoming_rx: parking_lot::Mutex::new(Some(incoming_rx)),
            generation: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Messages arriving on the subscribe connection. Can be taken once;
    /// the pub/sub registry owns it.
    pub fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<BrokerMessage>> {
        self.incoming_rx.lock().take()
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Store connection state changed");
        }
    }

    /// Opens the command, publish and subscribe connections in parallel and
    /// verifies liveness. No-op when already connected.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<(), StoreError> {
        let _guard = self.connect_lock.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        self.transition(ConnectionState::Connecting);

        match self.open_all().await {
            Ok(connections) => {
                let stale = self.connections.write().await.replace(connections);
                if let Some(stale) = stale {
                    stale.subscriber.close().await;
                }
                self.transition(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to store");
                self.transition(ConnectionState::Error);
                Err(e)
            }
        }
    }

    async fn open_all(&self) -> Result<Connections, StoreError> {
        let (command, publisher, subscriber) = tokio::try_join!(
            self.connector.open_command(),
            self.connector.open_publisher(),
            self.connector.open_subscriber(self.incoming_tx.clone()),
        )?;

        if let Err(e) = command.ping().await {
            subscriber.close().await;
            return Err(e);
        }

        Ok(Connections {
            command,
            publisher,
            subscriber,
            generation: self.next_generation(),
        })
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reopens a subscribe connection the server dropped. `lost` is the
    /// generation that went away; returns `Ok(false)` without touching
    /// anything when the manager has since disconnected or reconnected.
    #[instrument(skip(self))]
    pub async fn restore_subscriber(&self, lost: u64) -> Result<bool, StoreError> {
        let _guard = self.connect_lock.lock().await;
        let current = self.connections.read().await.as_ref().map(|c| c.generation);
        if current != Some(lost) {
            return Ok(false);
        }

        warn!("Subscribe connection lost, reopening");
        match self.connector.open_subscriber(self.incoming_tx.clone()).await {
            Ok(subscriber) => {
                if let Some(connections) = self.connections.write().await.as_mut() {
                    connections.subscriber = subscriber;
                    connections.generation = self.next_generation();
                }
                self.transition(ConnectionState::Connected);
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "Failed to reopen subscribe connection");
                self.transition(ConnectionState::Error);
                Err(e)
            }
        }
    }

    /// Closes all connections and transitions to `Disconnected`.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        if let Some(connections) = self.connections.write().await.take() {
            connections.subscriber.close().await;
        }
        self.transition(ConnectionState::Disconnected);
    }

    /// Disconnects exactly once per process, whichever caller gets here first.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing store connections");
        self.disconnect().await;
    }

    /// Spawns a task that disconnects on SIGINT / SIGTERM.
    pub fn install_shutdown_hook(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            shutdown_signal().await;
            manager.shutdown().await;
        })
    }

    /// Command connection for regular reads and writes.
    pub async fn command(&self) -> Result<Arc<dyn KeyValueStore>, StoreError> {
        self.connections
            .read()
            .await
            .as_ref()
            .map(|c| Arc::clone(&c.command))
            .ok_or(StoreError::NotConnected)
    }

    /// Dedicated publish connection.
    pub async fn publisher(&self) -> Result<Arc<dyn KeyValueStore>, StoreError> {
        self.connections
            .read()
            .await
            .as_ref()
            .map(|c| Arc::clone(&c.publisher))
            .ok_or(StoreError::NotConnected)
    }

    /// Dedicated subscribe connection.
    pub async fn subscriber(&self) -> Result<Arc<dyn SubscriberConnection>, StoreError> {
        self.subscriber_session().await.map(|(subscriber, _)| subscriber)
    }

    /// Subscribe connection together with its generation. Subscriptions made
    /// on one generation do not exist on the next.
    pub async fn subscriber_session(
        &self,
    ) -> Result<(Arc<dyn SubscriberConnection>, u64), StoreError> {
        self.connections
            .read()
            .await
            .as_ref()
            .map(|c| (Arc::clone(&c.subscriber), c.generation))
            .ok_or(StoreError::NotConnected)
    }

    /// Live round-trip probe plus store memory stats. Never fails; a failed
    /// probe, or a manager that is not `Connected`, is reported as
    /// `Unhealthy` with the error captured.
    pub async fn health_check(&self) -> HealthReport {
        let endpoint = self.connector.endpoint();
        let started = Instant::now();
        let state = self.state();

        let probe = async {
            if state != ConnectionState::Connected {
                return Err(StoreError::Connection(format!("connection state is {}", state)));
            }
            let command = self.command().await?;
            command.ping().await?;
            let latency = started.elapsed();
            let memory = command.memory_info().await.unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read store memory info");
                None
            });
            Ok::<_, StoreError>((latency, memory))
        };

        let (status, latency, memory, error) = match probe.await {
            Ok((latency, memory)) => (HealthStatus::Healthy, latency, memory, None),
            Err(e) => (
                HealthStatus::Unhealthy,
                started.elapsed(),
                None,
                Some(e.to_string()),
            ),
        };

        HealthReport {
            status,
            latency_ms: latency.as_millis() as u64,
            details: HealthDetails {
                connection: state,
                host: endpoint.host,
                port: endpoint.port,
                db: endpoint.db,
                memory,
                error,
            },
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
