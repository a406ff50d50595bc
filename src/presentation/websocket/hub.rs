//! Realtime Hub
//!
//! Tracks connected dashboard sessions and routes metric updates to the
//! sessions whose campaign/platform filter matches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::domain::{MetricUpdate, SubscriptionFilter, METRICS_CHANNEL_PATTERN};
use crate::infrastructure::metrics;
use crate::infrastructure::pubsub::{ChannelMessage, MessageHandler, PubSubRegistry, SubscriptionId};
use crate::infrastructure::store::StoreError;
use crate::shared::protocol::{events, Frame};

/// Outgoing frame queue of one session
pub type FrameSender = mpsc::UnboundedSender<Frame>;

/// Connected session info
#[derive(Debug)]
pub struct ConnectedSession {
    pub user_id: String,
    pub filter: SubscriptionFilter,
    sender: FrameSender,
    sequence: AtomicU64,
}

impl ConnectedSession {
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn dispatch<T: Serialize>(&self, event: &str, data: &T) -> bool {
        match Frame::dispatch(event, data, self.next_sequence()) {
            Ok(frame) => self.sender.send(frame).is_ok(),
            Err(e) => {
                tracing::error!(event, error = %e, "Failed to serialize dispatch");
                false
            }
        }
    }
}

/// Realtime hub for managing push sessions
#[derive(Debug)]
pub struct RealtimeHub {
    sessions: DashMap<String, ConnectedSession>,
    heartbeat_interval: u64,
}

impl RealtimeHub {
    pub fn new(heartbeat_interval: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            heartbeat_interval,
        }
    }

    pub fn heartbeat_interval(&self) -> u64 {
        self.heartbeat_interval
    }

    /// Routes every `metrics:*` message of `registry` into this hub.
    pub async fn attach(
        self: &Arc<Self>,
        registry: &PubSubRegistry,
    ) -> Result<SubscriptionId, StoreError> {
        let hub: Weak<Self> = Arc::downgrade(self);
        let handler: MessageHandler = Arc::new(move |message: &ChannelMessage| -> anyhow::Result<()> {
            let update: MetricUpdate = message.decode()?;
            if let Some(hub) = hub.upgrade() {
                hub.route(&update);
            }
            Ok(())
        });
        registry.psubscribe(METRICS_CHANNEL_PATTERN, handler).await
    }

    /// Register a new identified session
    pub fn register_session(&self, session_id: String, user_id: String, sender: FrameSender) {
        self.sessions.insert(
            session_id.clone(),
            ConnectedSession {
                user_id: user_id.clone(),
                filter: SubscriptionFilter::default(),
                sender,
                sequence: AtomicU64::new(0),
            },
        );
        metrics::set_realtime_sessions(self.sessions.len());

        tracing::info!(
            session_id = %session_id,
            user_id = %user_id,
            "Session registered"
        );
    }

    /// Unregister a session
    pub fn unregister_session(&self, session_id: &str) {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            metrics::set_realtime_sessions(self.sessions.len());
            tracing::info!(
                session_id = %session_id,
                user_id = %session.user_id,
                "Session unregistered"
            );
        }
    }

    /// Adds campaigns/platforms to a session's filter, returning the result.
    pub fn subscribe(&self, session_id: &str, filter: &SubscriptionFilter) -> Option<SubscriptionFilter> {
        self.sessions.get_mut(session_id).map(|mut session| {
            session.filter.extend(filter);
            session.filter.clone()
        })
    }

    /// Removes campaigns/platforms from a session's filter, returning the result.
    pub fn unsubscribe(&self, session_id: &str, filter: &SubscriptionFilter) -> Option<SubscriptionFilter> {
        self.sessions.get_mut(session_id).map(|mut session| {
            session.filter.remove(filter);
            session.filter.clone()
        })
    }

    pub fn session_filter(&self, session_id: &str) -> Option<SubscriptionFilter> {
        self.sessions.get(session_id).map(|s| s.filter.clone())
    }

    /// Sends a sequenced dispatch to one session. False if it is gone.
    pub fn dispatch_to_session<T: Serialize>(&self, session_id: &str, event: &str, data: &T) -> bool {
        self.sessions
            .get(session_id)
            .map(|session| session.dispatch(event, data))
            .unwrap_or(false)
    }

    /// Fans an update out to every matching session. Returns the number of
    /// sessions it was queued for.
    pub fn route(&self, update: &MetricUpdate) -> usize {
        let mut delivered = 0;
        for session in self.sessions.iter() {
            if session.filter.matches(&update.campaign_id, &update.platform)
                && session.dispatch(events::METRIC_UPDATE, update)
            {
                delivered += 1;
            }
        }
        tracing::debug!(
            campaign_id = %update.campaign_id,
            platform = %update.platform,
            delivered,
            "Metric update routed"
        );
        delivered
    }

    /// Get session count
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
