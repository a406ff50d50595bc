//! Realtime channel driver

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::backoff::ReconnectPolicy;
use super::buffer::{MetricsView, DEFAULT_UPDATE_LOG_CAPACITY};
use super::state::ChannelStatus;
use super::transport::{PushConnector, PushLink};
use super::ClientError;
use crate::domain::{MetricUpdate, SubscriptionFilter};
use crate::shared::protocol::{
    events, Frame, HelloPayload, IdentifyPayload, OpCode, SnapshotPayload,
};

/// Client channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Gateway URL, e.g. `ws://localhost:8080/gateway`
    pub url: String,
    /// Used until the gateway's Hello says otherwise
    pub heartbeat_interval: Duration,
    /// Silence after which the link counts as lost
    pub heartbeat_timeout: Duration,
    /// Bound on one attempt: token, connect and Identify
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub update_log_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/gateway".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            update_log_capacity: DEFAULT_UPDATE_LOG_CAPACITY,
        }
    }
}

/// Supplies the bearer token sent on every (re)connect.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn token(&self) -> Result<String, ClientError>;
}

/// A fixed token
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn token(&self) -> Result<String, ClientError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug)]
enum Command {
    Connect,
    Subscribe(SubscriptionFilter),
    Unsubscribe(SubscriptionFilter),
    Refresh,
    Disconnect,
}

/// Caller side of a running channel
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ChannelStatus>,
    view: Arc<RwLock<MetricsView>>,
}

impl ChannelHandle {
    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }

    /// Opens the connection; no-op while connected or connecting.
    pub fn connect(&self) -> Result<(), ClientError> {
        self.send(Command::Connect)
    }

    /// Follows more campaigns/platforms. Kept across reconnects.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Result<(), ClientError> {
        self.send(Command::Subscribe(filter))
    }

    pub fn unsubscribe(&self, filter: SubscriptionFilter) -> Result<(), ClientError> {
        self.send(Command::Unsubscribe(filter))
    }

    /// Re-asserts the subscription set and requests a snapshot.
    pub fn refresh(&self) -> Result<(), ClientError> {
        self.send(Command::Refresh)
    }

    /// Closes the connection and cancels any pending reconnect.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.send(Command::Disconnect)
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Reads the current aggregate and update log.
    pub fn with_view<R>(&self, f: impl FnOnce(&MetricsView) -> R) -> R {
        f(&self.view.read())
    }

    /// Waits until connected. Fails once the channel gives up or is closed.
    pub async fn wait_connected(&self) -> Result<(), ClientError> {
        let mut status = self.status.clone();
        loop {
            match *status.borrow_and_update() {
                ChannelStatus::Connected => return Ok(()),
                ChannelStatus::Failed { attempts } => {
                    return Err(ClientError::ReconnectExhausted { attempts })
                }
                ChannelStatus::Closed => return Err(ClientError::Closed),
                _ => {}
            }
            status.changed().await.map_err(|_| ClientError::Closed)?;
        }
    }
}

/// Spawns channel driver tasks
pub struct RealtimeChannel;

impl RealtimeChannel {
    /// Starts the driver task. It runs until every handle is dropped.
    pub fn spawn(
        config: ChannelConfig,
        connector: Arc<dyn PushConnector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> ChannelHandle {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ChannelStatus::Idle);
        let view = Arc::new(RwLock::new(MetricsView::new(config.update_log_capacity)));

        let driver = Driver {
            heartbeat_interval: config.heartbeat_interval,
            config,
            connector,
            credentials,
            status: status_tx,
            view: Arc::clone(&view),
            filter: SubscriptionFilter::default(),
            link: None,
            opening: None,
            ready: false,
            attempts: 0,
            reconnect_at: None,
            heartbeat: None,
            last_seen: Instant::now(),
        };
        tokio::spawn(driver.run(command_rx));

        ChannelHandle {
            commands,
            status,
            view,
        }
    }
}

type PendingOpen = Pin<Box<dyn Future<Output = Result<PushLink, ClientError>> + Send>>;

struct Driver {
    config: ChannelConfig,
    connector: Arc<dyn PushConnector>,
    credentials: Arc<dyn CredentialProvider>,
    status: watch::Sender<ChannelStatus>,
    view: Arc<RwLock<MetricsView>>,
    filter: SubscriptionFilter,
    link: Option<PushLink>,
    /// Connect attempt in flight; dropping it cancels the attempt
    opening: Option<PendingOpen>,
    /// READY received on the current link
    ready: bool,
    attempts: u32,
    reconnect_at: Option<Instant>,
    heartbeat: Option<Interval>,
    heartbeat_interval: Duration,
    last_seen: Instant,
}

async fn next_frame(link: &mut Option<PushLink>) -> Option<Frame> {
    match link {
        Some(link) => link.incoming.recv().await,
        None => std::future::pending().await,
    }
}

async fn opened(opening: &mut Option<PendingOpen>) -> Result<PushLink, ClientError> {
    match opening {
        Some(attempt) => attempt.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn reconnect_due(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn heartbeat_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                result = opened(&mut self.opening) => {
                    self.opening = None;
                    self.on_opened(result);
                }
                frame = next_frame(&mut self.link) => match frame {
                    Some(frame) => self.handle_frame(frame),
                    None => self.link_lost("connection closed"),
                },
                _ = heartbeat_tick(&mut self.heartbeat) => self.on_heartbeat(),
                _ = reconnect_due(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.open();
                }
            }
        }
        self.teardown();
        tracing::debug!("Realtime channel stopped");
    }

    fn set_status(&self, status: ChannelStatus) {
        self.status.send_replace(status);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                if self.link.is_some() || self.opening.is_some() {
                    return;
                }
                if self.reconnect_at.take().is_none() {
                    // Fresh start from idle, closed or failed
                    self.attempts = 0;
                }
                self.open();
            }
            Command::Subscribe(filter) => {
                self.filter.extend(&filter);
                self.send_when_ready(OpCode::Subscribe, &filter);
            }
            Command::Unsubscribe(filter) => {
                self.filter.remove(&filter);
                let followed = self.filter.clone();
                self.view
                    .write()
                    .retain(|campaign, platform| followed.matches(campaign, platform));
                self.send_when_ready(OpCode::Unsubscribe, &filter);
            }
            Command::Refresh => {
                let filter = self.filter.clone();
                self.send_when_ready(OpCode::Subscribe, &filter);
                self.send_when_ready(OpCode::RequestSnapshot, &filter);
            }
            Command::Disconnect => {
                self.teardown();
                self.attempts = 0;
                self.set_status(ChannelStatus::Closed);
                tracing::info!("Realtime channel closed by caller");
            }
        }
    }

    /// Drops the link and every timer.
    fn teardown(&mut self) {
        self.link = None;
        self.opening = None;
        self.ready = false;
        self.reconnect_at = None;
        self.heartbeat = None;
    }

    fn send_when_ready(&self, op: OpCode, filter: &SubscriptionFilter) {
        // a platform-only filter still narrows what the gateway pushes
        if !self.ready || (filter.campaign_ids.is_empty() && filter.platforms.is_empty()) {
            return;
        }
        self.send(op, filter);
    }

    fn send<T: serde::Serialize>(&self, op: OpCode, data: &T) {
        let Some(link) = &self.link else {
            return;
        };
        let sent = Frame::with_data(op, data)
            .map_err(|e| ClientError::Protocol(e.to_string()))
            .and_then(|frame| link.send(frame));
        if let Err(e) = sent {
            tracing::debug!(op = ?op, error = %e, "Failed to send frame");
        }
    }

    /// Starts one connection attempt. It runs inside the driver loop so
    /// commands keep flowing, and resolves through `on_opened`.
    fn open(&mut self) {
        self.set_status(ChannelStatus::Connecting);

        let credentials = Arc::clone(&self.credentials);
        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        let limit = self.config.connect_timeout;
        self.opening = Some(Box::pin(async move {
            let attempt = async {
                let token = credentials.token().await?;
                let link = connector.connect(&url).await?;
                link.send(
                    Frame::with_data(OpCode::Identify, &IdentifyPayload { token })
                        .map_err(|e| ClientError::Protocol(e.to_string()))?,
                )?;
                Ok::<_, ClientError>(link)
            };
            match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Connect(format!(
                    "timed out after {}ms",
                    limit.as_millis()
                ))),
            }
        }));
    }

    /// Failure schedules the next attempt.
    fn on_opened(&mut self, opened: Result<PushLink, ClientError>) {
        match opened {
            Ok(link) => {
                self.link = Some(link);
                self.ready = false;
                self.last_seen = Instant::now();
                self.start_heartbeat();
                tracing::debug!(url = %self.config.url, "Push connection opened");
            }
            Err(e) => {
                tracing::warn!(url = %self.config.url, error = %e, "Push connection failed");
                self.schedule_reconnect();
            }
        }
    }

    fn start_heartbeat(&mut self) {
        let period = self.heartbeat_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(interval);
    }

    fn schedule_reconnect(&mut self) {
        let policy = self.config.reconnect;
        if policy.exhausted(self.attempts) {
            tracing::warn!(attempts = self.attempts, "Giving up reconnecting");
            self.set_status(ChannelStatus::Failed {
                attempts: self.attempts,
            });
            return;
        }

        let delay = policy.delay_for(self.attempts);
        self.attempts += 1;
        self.reconnect_at = Some(Instant::now() + delay);
        self.set_status(ChannelStatus::Reconnecting {
            attempt: self.attempts,
            delay,
        });
        tracing::info!(attempt = self.attempts, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
    }

    fn link_lost(&mut self, reason: &str) {
        tracing::info!(reason, "Push connection lost");
        self.link = None;
        self.ready = false;
        self.heartbeat = None;
        self.set_status(ChannelStatus::Disconnected);
        self.schedule_reconnect();
    }

    fn on_heartbeat(&mut self) {
        if self.last_seen.elapsed() >= self.config.heartbeat_timeout {
            self.link_lost("heartbeat timeout");
            return;
        }
        if let Some(link) = &self.link {
            if link.send(Frame::op(OpCode::Heartbeat)).is_err() {
                self.link_lost("send failed");
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        self.last_seen = Instant::now();

        match frame.opcode() {
            Some(OpCode::Hello) => {
                if let Ok(hello) = frame.data::<HelloPayload>() {
                    self.heartbeat_interval = Duration::from_millis(hello.heartbeat_interval);
                    self.start_heartbeat();
                }
            }
            Some(OpCode::HeartbeatAck) => {}
            Some(OpCode::InvalidSession) => {
                tracing::warn!("Gateway rejected the session");
                self.link_lost("invalid session");
            }
            Some(OpCode::Dispatch) => self.handle_dispatch(frame),
            _ => tracing::debug!(op = frame.op, "Unexpected frame"),
        }
    }

    fn handle_dispatch(&mut self, frame: Frame) {
        match frame.t.as_deref() {
            Some(events::READY) => {
                self.ready = true;
                self.attempts = 0;
                self.set_status(ChannelStatus::Connected);
                tracing::info!("Realtime channel connected");
                // Server-side filters do not survive a reconnect
                let filter = self.filter.clone();
                self.send_when_ready(OpCode::Subscribe, &filter);
            }
            Some(events::METRIC_UPDATE) => match frame.data::<MetricUpdate>() {
                Ok(update) => {
                    self.view.write().apply(update);
                }
                Err(e) => tracing::debug!(error = %e, "Malformed metric update"),
            },
            Some(events::SNAPSHOT) => match frame.data::<SnapshotPayload>() {
                Ok(snapshot) => {
                    let mut view = self.view.write();
                    for update in snapshot.updates {
                        view.apply(update);
                    }
                }
                Err(e) => tracing::debug!(error = %e, "Malformed snapshot"),
            },
            other => tracing::debug!(event = ?other, "Unhandled dispatch"),
        }
    }
}
