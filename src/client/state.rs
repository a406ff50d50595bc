//! Channel status

use std::time::Duration;

/// Lifecycle state of a realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Created, never connected
    Idle,
    Connecting,
    Connected,
    /// Link lost, reconnect not yet scheduled
    Disconnected,
    /// Waiting `delay` before reconnect attempt number `attempt`
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect attempts exhausted; only an explicit connect restarts it
    Failed { attempts: u32 },
    /// Disconnected by the caller
    Closed,
}

/// What a dashboard shows for a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusIndicator {
    Live,
    /// Transient
    Reconnecting,
    /// Persistent
    Offline,
    Hidden,
}

impl ChannelStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ChannelStatus::Connected)
    }

    pub fn indicator(&self) -> StatusIndicator {
        match self {
            ChannelStatus::Connected => StatusIndicator::Live,
            ChannelStatus::Connecting
            | ChannelStatus::Disconnected
            | ChannelStatus::Reconnecting { .. } => StatusIndicator::Reconnecting,
            ChannelStatus::Failed { .. } => StatusIndicator::Offline,
            ChannelStatus::Idle | ChannelStatus::Closed => StatusIndicator::Hidden,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicator_mapping() {
        let reconnecting = ChannelStatus::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1),
        };
        assert_eq!(reconnecting.indicator(), StatusIndicator::Reconnecting);
        assert_eq!(
            ChannelStatus::Failed { attempts: 10 }.indicator(),
            StatusIndicator::Offline
        );
        assert_eq!(ChannelStatus::Connected.indicator(), StatusIndicator::Live);
        assert!(!ChannelStatus::Closed.is_connected());
    }
}
