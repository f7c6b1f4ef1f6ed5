//! Exponential backoff and terminal-failure decisions.
//!
//! Backoff state is plain row data: given the persisted `attempts` count any
//! relay instance computes the same next retry time.
//!
//! ```text
//! failures   delay (base = 1s)
//! ────────────────────────────
//!    1            1s
//!    2            2s
//!    3            4s
//!    4            8s
//!  >= max      FAILED (terminal)
//! ```

use std::time::Duration;

use crate::domain::foundation::Timestamp;

/// What happens to a leased row after a failed publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to `pending`, eligible again at `next_attempt_at`.
    Retry {
        attempts: u32,
        next_attempt_at: Timestamp,
    },
    /// Attempts exhausted; the row becomes `failed`.
    Exhausted { attempts: u32 },
}

impl FailureOutcome {
    /// Attempt count after this failure.
    pub fn attempts(&self) -> u32 {
        match self {
            FailureOutcome::Retry { attempts, .. } => *attempts,
            FailureOutcome::Exhausted { attempts } => *attempts,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FailureOutcome::Exhausted { .. })
    }
}

/// Process-wide retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay before the next attempt after `failures` consecutive failures:
    /// `base * 2^(failures - 1)`, capped at `max_delay`.
    pub fn delay_after_failures(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }

    /// Decides the next state for a row that was leased with `attempts`
    /// prior failures and just failed again.
    pub fn on_failure(&self, attempts: u32, now: Timestamp) -> FailureOutcome {
        let attempts = attempts.saturating_add(1);
        if attempts >= self.max_attempts {
            FailureOutcome::Exhausted { attempts }
        } else {
            FailureOutcome::Retry {
                attempts,
                next_attempt_at: now.plus(self.delay_after_failures(attempts)),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(max_attempts: u32, base_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(base_ms),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn first_failure_waits_base_delay() {
        let policy = policy(5, 1000);
        assert_eq!(policy.delay_after_failures(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after_failures(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after_failures(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after_failures(4), Duration::from_secs(8));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = RetryPolicy::new(50, Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(policy.delay_after_failures(7), Duration::from_secs(60));
        assert_eq!(policy.delay_after_failures(40), Duration::from_secs(60));
    }

    #[test]
    fn failure_below_max_schedules_retry() {
        let now = Timestamp::now();
        let outcome = policy(3, 500).on_failure(0, now);

        assert_eq!(
            outcome,
            FailureOutcome::Retry {
                attempts: 1,
                next_attempt_at: now.plus(Duration::from_millis(500)),
            }
        );
        assert!(!outcome.is_terminal());
    }

    #[test]
    fn failure_reaching_max_is_terminal() {
        let outcome = policy(3, 500).on_failure(2, Timestamp::now());
        assert_eq!(outcome, FailureOutcome::Exhausted { attempts: 3 });
        assert!(outcome.is_terminal());
    }

    #[test]
    fn single_attempt_policy_fails_immediately() {
        let outcome = policy(1, 500).on_failure(0, Timestamp::now());
        assert_eq!(outcome, FailureOutcome::Exhausted { attempts: 1 });
    }

    #[test]
    fn zero_max_attempts_is_clamped() {
        assert_eq!(policy(0, 500).max_attempts(), 1);
    }

    proptest! {
        #[test]
        fn delay_doubles_per_failure(base_ms in 1u64..10_000, failures in 1u32..8) {
            let policy = policy(100, base_ms);
            let expected = Duration::from_millis(base_ms * 2u64.pow(failures - 1));
            prop_assert_eq!(policy.delay_after_failures(failures), expected);
        }

        #[test]
        fn attempts_increase_by_one_per_failure(max in 1u32..20, prior in 0u32..40) {
            let policy = policy(max, 100);
            let outcome = policy.on_failure(prior, Timestamp::now());
            prop_assert_eq!(outcome.attempts(), prior + 1);
            prop_assert_eq!(outcome.is_terminal(), prior + 1 >= max);
        }
    }
}
