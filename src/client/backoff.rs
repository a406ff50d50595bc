//! Reconnect backoff

use std::time::Duration;

/// Exponential backoff with a cap and a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub cap_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            cap_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^attempt, cap)`, where `attempt` counts failed reconnects
    /// so far (0 for the first one).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.cap_delay, |delay| delay.min(self.cap_delay))
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 1 ; "first attempt uses base")]
    #[test_case(1, 2 ; "doubles")]
    #[test_case(4, 16 ; "sixteen")]
    #[test_case(5, 30 ; "capped")]
    #[test_case(40, 30 ; "shift overflow stays capped")]
    fn test_delay_for(attempt: u32, expected_secs: u64) {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(attempt), Duration::from_secs(expected_secs));
    }

    #[test]
    fn test_exhausted_at_max_attempts() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.exhausted(9));
        assert!(policy.exhausted(10));
    }
}
