use std::time::Duration;

use rand::Rng;

/// How a channel retries after a connection failure (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconnectPolicy {
    /// Single attempt; on failure the channel is marked `Failed`.
    None,
    /// Reattempt every `interval`, up to `max_attempts` (0 = unlimited).
    Fixed { interval: Duration, max_attempts: u32 },
    /// `delay = min(initial * multiplier^n, max)`, scaled by a uniform
    /// jitter factor in `[1-jitter, 1+jitter]`. `max_attempts = 0` means
    /// unlimited attempts.
    ExponentialBackoff {
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: f64,
        max_attempts: u32,
    },
}

impl ReconnectPolicy {
    /// Whether a further attempt is permitted after `attempts_so_far`
    /// failed attempts.
    pub fn allows_attempt(&self, attempts_so_far: u32) -> bool {
        match self {
            ReconnectPolicy::None => attempts_so_far == 0,
            ReconnectPolicy::Fixed { max_attempts, .. }
            | ReconnectPolicy::ExponentialBackoff { max_attempts, .. } => {
                *max_attempts == 0 || attempts_so_far < *max_attempts
            }
        }
    }

    /// Delay to wait before attempt number `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            ReconnectPolicy::None => Duration::ZERO,
            ReconnectPolicy::Fixed { interval, .. } => *interval,
            ReconnectPolicy::ExponentialBackoff {
                initial,
                max,
                multiplier,
                jitter,
                ..
            } => {
                let unscaled = initial.as_secs_f64() * multiplier.powi(attempt as i32);
                let bounded = unscaled.min(max.as_secs_f64());
                let jitter = jitter.clamp(0.0, 1.0);
                let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
                Duration::from_secs_f64((bounded * factor).max(0.0))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_policy_allows_exactly_one_attempt() {
        let policy = ReconnectPolicy::None;
        assert!(policy.allows_attempt(0));
        assert!(!policy.allows_attempt(1));
    }

    #[test]
    fn fixed_policy_with_zero_max_attempts_is_unlimited() {
        let policy = ReconnectPolicy::Fixed { interval: Duration::from_millis(100), max_attempts: 0 };
        assert!(policy.allows_attempt(1_000));
    }

    #[test]
    fn exponential_backoff_delay_grows_and_is_bounded_by_max() {
        let policy = ReconnectPolicy::ExponentialBackoff {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(4),
            multiplier: 4.0,
            jitter: 0.0,
            max_attempts: 3,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        // Would be 16s unscaled; must clamp to max.
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn exponential_backoff_respects_max_attempts() {
        let policy = ReconnectPolicy::ExponentialBackoff {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(4),
            multiplier: 4.0,
            jitter: 0.0,
            max_attempts: 3,
        };
        assert!(policy.allows_attempt(2));
        assert!(!policy.allows_attempt(3));
    }
}
