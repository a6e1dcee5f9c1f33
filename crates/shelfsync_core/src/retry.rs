//! Bounded exponential backoff.

use crate::error::RemoteError;
use serde::Deserialize;
use std::time::Duration;

/// Retry policy for remote calls.
///
/// `next_delay(attempt) = min(initial_delay * 2^attempt, cap_delay)`. The
/// schedule is deterministic; there is no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    #[serde(rename = "cap_delay_ms", with = "millis")]
    pub cap_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the default delays.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            cap_delay: Duration::from_millis(2000),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            cap_delay: Duration::ZERO,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the delay cap.
    pub fn with_cap_delay(mut self, delay: Duration) -> Self {
        self.cap_delay = delay;
        self
    }

    /// Sets the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay to wait after failed attempt `attempt` (0-indexed).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.cap_delay)
    }

    /// Returns true if attempt `attempt` failed with `error` and another
    /// attempt should follow.
    pub fn should_retry(&self, attempt: u32, error: &RemoteError) -> bool {
        error.is_transient() && attempt.saturating_add(1) < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.next_delay(0), Duration::from_millis(100));
        assert_eq!(policy.next_delay(1), Duration::from_millis(200));
        assert_eq!(policy.next_delay(2), Duration::from_millis(400));
        assert_eq!(policy.next_delay(3), Duration::from_millis(800));
        assert_eq!(policy.next_delay(4), Duration::from_millis(1600));
        assert_eq!(policy.next_delay(5), Duration::from_millis(2000));
    }

    #[test]
    fn large_attempts_are_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(31), Duration::from_millis(2000));
        assert_eq!(policy.next_delay(32), Duration::from_millis(2000));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_millis(2000));
    }

    #[test]
    fn only_transient_errors_retry() {
        let policy = RetryPolicy::default();
        let transient = RemoteError::timeout();
        assert!(policy.should_retry(0, &transient));
        assert!(policy.should_retry(1, &transient));
        assert!(!policy.should_retry(2, &transient));

        assert!(!policy.should_retry(
            0,
            &RemoteError::Rejected {
                code: 400,
                message: "invalid".into()
            }
        ));
        assert!(!policy.should_retry(0, &RemoteError::Unauthenticated));
        assert!(!policy.should_retry(0, &RemoteError::Unknown("?".into())));
    }

    #[test]
    fn no_retry_policy() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(0, &RemoteError::timeout()));
    }

    #[test]
    fn overrides() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay(Duration::from_millis(50))
            .with_cap_delay(Duration::from_millis(300));
        assert_eq!(policy.next_delay(0), Duration::from_millis(50));
        assert_eq!(policy.next_delay(2), Duration::from_millis(200));
        assert_eq!(policy.next_delay(3), Duration::from_millis(300));
    }

    #[test]
    fn deserializes_millis() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 4, "initial_delay_ms": 10}"#).unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_delay, Duration::from_millis(10));
        assert_eq!(policy.cap_delay, Duration::from_millis(2000));
    }
}
