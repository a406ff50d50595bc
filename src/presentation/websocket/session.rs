//! WebSocket Session State

use tokio::time::{Duration, Instant};

/// Per-connection state owned by the socket task
#[derive(Debug)]
pub struct SessionState {
    pub session_id: String,
    pub user_id: Option<String>,
    pub last_heartbeat: Instant,
}

impl SessionState {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            user_id: None,
            last_heartbeat: Instant::now(),
        }
    }

    pub fn identified(&self) -> bool {
        self.user_id.is_some()
    }

    /// Any inbound frame counts as liveness.
    pub fn heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    pub fn is_alive(&self, timeout_ms: u64) -> bool {
        self.last_heartbeat.elapsed() < Duration::from_millis(timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_session_expires_without_heartbeat() {
        let mut state = SessionState::new("s-1".into());
        assert!(!state.identified());

        tokio::time::advance(Duration::from_millis(59_000)).await;
        assert!(state.is_alive(60_000));

        state.heartbeat();
        tokio::time::advance(Duration::from_millis(59_000)).await;
        assert!(state.is_alive(60_000));

        tokio::time::advance(Duration::from_millis(2_000)).await;
        assert!(!state.is_alive(60_000));
    }
}
