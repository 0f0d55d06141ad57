//! Exponential reconnect backoff.
//!
//! Attempt `n` (1-based) waits `base_delay * 2^(n-1)`. There is no upper cap
//! on the delay; the attempt limit is the only bound.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before attempt `attempt` (1-based). Saturates instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Given the attempts already made, return the next attempt number and
    /// its delay, or `None` once the budget is spent.
    pub fn next(&self, attempts_made: u32) -> Option<(u32, Duration)> {
        if attempts_made >= self.max_attempts {
            return None;
        }
        let attempt = attempts_made + 1;
        Some((attempt, self.delay_for(attempt)))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u128> = (1..=5).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn test_budget_is_respected() {
        let policy = ReconnectPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.next(0), Some((1, Duration::from_millis(100))));
        assert_eq!(policy.next(2), Some((3, Duration::from_millis(400))));
        assert_eq!(policy.next(3), None);
        assert_eq!(policy.next(10), None);
    }

    #[test]
    fn test_zero_attempts_never_reconnects() {
        let policy = ReconnectPolicy::new(0, Duration::from_millis(100));
        assert_eq!(policy.next(0), None);
    }

    #[test]
    fn test_large_attempt_saturates() {
        let policy = ReconnectPolicy::new(u32::MAX, Duration::from_secs(1));
        assert_eq!(policy.delay_for(200), Duration::from_secs(u64::from(u32::MAX)));
        assert_eq!(ReconnectPolicy::new(1, Duration::MAX).delay_for(3), Duration::MAX);
    }
}
