//! Realtime Client Channel
//!
//! Dashboard side of the push gateway. One spawned task per channel owns
//! the connection, the heartbeat and any pending reconnect; callers talk
//! to it through a [`ChannelHandle`].
//!
//! ```text
//! idle -> connecting -> connected -> (disconnected <-> reconnecting) -> closed
//!                                                   \-> failed
//! ```

mod backoff;
mod buffer;
mod channel;
mod state;
mod transport;

pub use backoff::ReconnectPolicy;
pub use buffer::{MetricsView, UpdateLog, DEFAULT_UPDATE_LOG_CAPACITY};
pub use channel::{ChannelConfig, ChannelHandle, CredentialProvider, RealtimeChannel, StaticToken};
pub use state::{ChannelStatus, StatusIndicator};
pub use transport::{PushConnector, PushLink, WsConnector};

/// Client channel errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Channel closed")]
    Closed,

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}
