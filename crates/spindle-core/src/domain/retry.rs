//! Retry policy: decides whether and when to try again.
//!
//! The policy is a pure function of (attempts so far, error kind). The loop
//! that sleeps and re-invokes lives in `app::retry`.

use std::time::Duration;

use super::errors::ErrorKind;

/// The next action after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Try again after `delay`.
    Retry { delay: Duration, reason: String },

    /// Stop and surface the last error.
    GiveUp { reason: String },
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Deadline for one attempt; exceeding it counts as a transient failure.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Metadata resolution is cheap, so be patient with it.
    pub fn lenient() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(30),
        }
    }

    /// Format acquisition moves large files; fail fast.
    pub fn strict() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(4),
            attempt_timeout: Duration::from_secs(900),
        }
    }

    /// Delay after the `attempts`-th failure (1-indexed):
    /// `min(base_delay * multiplier^(attempts - 1), max_delay)`.
    ///
    /// With base=1s, multiplier=2.0, max=8s: 1s, 2s, 4s, 8s, 8s, ...
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Decide what to do after the `attempts`-th attempt failed with `kind`.
    pub fn decide(&self, attempts: u32, kind: ErrorKind) -> Decision {
        if kind == ErrorKind::Permanent {
            return Decision::GiveUp {
                reason: "permanent error".to_string(),
            };
        }
        if attempts >= self.max_attempts {
            return Decision::GiveUp {
                reason: format!("max attempts reached: {}/{}", attempts, self.max_attempts),
            };
        }
        let delay = self.next_delay(attempts);
        Decision::Retry {
            delay,
            reason: format!(
                "retry attempt {}/{} after {:?}",
                attempts + 1,
                self.max_attempts,
                delay
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(30),
        }
    }

    #[rstest]
    #[case::first(1, 1)]
    #[case::second(2, 2)]
    #[case::third(3, 4)]
    #[case::fourth(4, 8)]
    #[case::capped(5, 8)]
    #[case::far_beyond(200, 8)]
    fn backoff_doubles_up_to_cap(#[case] attempts: u32, #[case] secs: u64) {
        assert_eq!(policy().next_delay(attempts), Duration::from_secs(secs));
    }

    #[test]
    fn zero_attempts_uses_base_delay() {
        assert_eq!(policy().next_delay(0), Duration::from_secs(1));
    }

    #[test]
    fn transient_error_is_retried_while_budget_remains() {
        let d = policy().decide(2, ErrorKind::Transient);
        assert!(matches!(d, Decision::Retry { delay, .. } if delay == Duration::from_secs(2)));
    }

    #[test]
    fn transient_error_gives_up_when_budget_is_spent() {
        let d = policy().decide(5, ErrorKind::Transient);
        assert!(matches!(d, Decision::GiveUp { ref reason } if reason.contains("5/5")));
    }

    #[test]
    fn permanent_error_is_never_retried() {
        let d = policy().decide(1, ErrorKind::Permanent);
        assert!(matches!(d, Decision::GiveUp { .. }));
    }

    #[test]
    fn presets_differ_in_leniency() {
        let resolve = RetryPolicy::lenient();
        let acquire = RetryPolicy::strict();
        assert!(resolve.max_attempts > acquire.max_attempts);
        assert!(resolve.attempt_timeout < acquire.attempt_timeout);
    }
}
