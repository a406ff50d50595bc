//! WebSocket Push Gateway
//!
//! Server end of the dashboards' realtime channel.

pub mod handler;
pub mod hub;
pub mod session;

pub use handler::ws_handler;
pub use hub::{FrameSender, RealtimeHub};
pub use session::SessionState;
