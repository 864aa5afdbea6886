//! Reconnect backoff policy and per-session retry state.
//!
//! The schedule is `delay(n) = min(base * 2^n, cap)` for attempt `n`
//! (zero-based). Retry state resets on every successful `Connected`
//! transition and freezes once `max_attempts` is reached.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// RetryPolicy
// ============================================================================

/// Parameters of the exponential backoff schedule.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay of the first attempt.
    pub base: Duration,
    /// Upper bound on any delay.
    pub cap: Duration,
    /// Attempts before the terminal `MaxRetriesExceeded`.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Creates a policy from explicit parameters.
    #[inline]
    #[must_use]
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// Returns the delay before attempt `n` (zero-based).
    #[must_use]
    pub fn delay_for(&self, n: u32) -> Duration {
        let factor = 2u32.checked_pow(n).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

// ============================================================================
// RetryState
// ============================================================================

/// Mutable reconnect progress for the singleton session.
#[derive(Debug, Clone, Copy)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    /// Creates a fresh retry state under `policy`.
    #[inline]
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Number of reconnect attempts made since the last reset.
    #[inline]
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns `true` once all attempts are used up.
    #[inline]
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.policy.max_attempts
    }

    /// Returns the delay for the next attempt without consuming it.
    #[inline]
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        self.policy.delay_for(self.attempt)
    }

    /// Consumes one attempt, returning its delay.
    ///
    /// Returns `None` when the state is exhausted; the counter freezes so
    /// callers can observe how many attempts were made.
    pub fn take_attempt(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        let delay = self.next_delay();
        self.attempt += 1;
        Some(delay)
    }

    /// Resets the counter. Called on every `Connected` entry.
    #[inline]
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn default_policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60), 5)
    }

    #[test]
    fn test_delay_sequence_doubles_until_cap() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60), 10);

        let delays: Vec<u64> = (0..8).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_delay_for_huge_attempt_saturates_at_cap() {
        let policy = default_policy();
        assert_eq!(policy.delay_for(40), Duration::from_secs(60));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_take_attempt_consumes_schedule() {
        let mut state = RetryState::new(default_policy());

        assert_eq!(state.take_attempt(), Some(Duration::from_secs(1)));
        assert_eq!(state.take_attempt(), Some(Duration::from_secs(2)));
        assert_eq!(state.take_attempt(), Some(Duration::from_secs(4)));
        assert_eq!(state.take_attempt(), Some(Duration::from_secs(8)));
        assert_eq!(state.take_attempt(), Some(Duration::from_secs(16)));
        assert_eq!(state.take_attempt(), None);
        assert!(state.exhausted());
    }

    #[test]
    fn test_counter_freezes_when_exhausted() {
        let mut state = RetryState::new(RetryPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            2,
        ));

        assert!(state.take_attempt().is_some());
        assert!(state.take_attempt().is_some());
        assert!(state.take_attempt().is_none());
        assert!(state.take_attempt().is_none());
        assert_eq!(state.attempt(), 2);
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut state = RetryState::new(default_policy());
        let _ = state.take_attempt();
        let _ = state.take_attempt();
        assert_eq!(state.attempt(), 2);

        state.reset();
        assert_eq!(state.attempt(), 0);
        assert_eq!(state.next_delay(), Duration::from_secs(1));
    }
}
