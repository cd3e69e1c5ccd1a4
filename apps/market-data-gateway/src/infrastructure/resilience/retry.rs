//! Retry Policy and Exponential Backoff
//!
//! Backoff calculation for the primary-provider retry loop. Only transient
//! failures are retried; the classification itself lives on
//! [`crate::application::ports::ProviderError`].

use std::time::Duration;

use rand::Rng;

// =============================================================================
// Policy
// =============================================================================

/// Retry policy for one upstream call path.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts including the first (not per-retry).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Cap on any single delay.
    pub max_backoff: Duration,
    /// Multiplier applied per retry.
    pub multiplier: f64,
    /// Jitter fraction (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

// =============================================================================
// Backoff Calculator
// =============================================================================

/// Stateful backoff sequence for a single logical request.
#[derive(Debug)]
pub struct Backoff {
    attempt: u32,
    max_attempts: u32,
    current: Duration,
    max: Duration,
    multiplier: f64,
    jitter_factor: f64,
}

impl Backoff {
    /// Start a backoff sequence from a policy.
    #[must_use]
    pub const fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.max_attempts,
            current: policy.initial_backoff,
            max: policy.max_backoff,
            multiplier: policy.multiplier,
            jitter_factor: policy.jitter_factor,
        }
    }

    /// Delay before the next retry, or `None` when the budget is spent.
    ///
    /// The first call accounts for the first retry, so a policy with
    /// `max_attempts = 3` yields exactly two delays.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }

        let delay = self.apply_jitter(self.current);

        let scaled = self.current.as_secs_f64() * self.multiplier;
        self.current = Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()));

        Some(delay)
    }

    /// Attempts consumed so far.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return duration.min(self.max);
        }

        let base_ms = duration.as_millis() as f64;
        let range = base_ms * self.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-range..=range);
        let adjusted = (base_ms + jitter).max(1.0);

        Duration::from_millis(adjusted as u64).min(self.max)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            jitter_factor: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(5));
    }

    #[test]
    fn three_attempts_yield_two_delays() {
        let mut backoff = Backoff::new(&no_jitter(3));

        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            multiplier: 10.0,
            jitter_factor: 0.0,
        };
        let mut backoff = Backoff::new(&policy);

        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(5)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn jitter_stays_in_range() {
        for _ in 0..100 {
            let policy = RetryPolicy {
                max_attempts: 5,
                initial_backoff: Duration::from_millis(1000),
                jitter_factor: 0.1,
                ..Default::default()
            };
            let mut backoff = Backoff::new(&policy);

            let delay = backoff.next_delay().unwrap();
            let ms = delay.as_millis();
            assert!((900..=1100).contains(&ms), "delay {ms}ms out of range");
        }
    }

    #[test]
    fn attempt_counter_advances() {
        let mut backoff = Backoff::new(&no_jitter(3));
        assert_eq!(backoff.attempt(), 0);

        let _ = backoff.next_delay();
        assert_eq!(backoff.attempt(), 1);
    }
}
