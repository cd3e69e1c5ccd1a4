//! Reconnection Policy
//!
//! Exponential backoff with jitter for the push-feed connection. Unlike the
//! request-path retry budget, a reconnect schedule survives across sessions:
//! it resets only when a connection is actually established, and it can be
//! configured for unlimited attempts.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
    /// Jitter fraction (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 10,
        }
    }
}

/// Stateful reconnect schedule.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a schedule from configuration.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` when attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts {
            return None;
        }

        let exponent = self.attempts.min(24);
        self.attempts += 1;

        let scaled =
            self.config.initial_delay.as_secs_f64() * self.config.multiplier.powi(exponent as i32);
        let capped = scaled.min(self.config.max_delay.as_secs_f64());

        Some(self.jittered(Duration::from_secs_f64(capped)))
    }

    /// Reset after a successful connection.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return base;
        }

        let base_ms = base.as_millis() as f64;
        let range = base_ms * self.config.jitter_factor;
        let offset: f64 = rand::rng().random_range(-range..=range);
        Duration::from_millis((base_ms + offset).max(1.0) as u64)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn delays_double_up_to_cap() {
        let mut policy = ReconnectPolicy::new(config(0));

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(800)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1600)));
        // Capped from here on.
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn attempts_are_bounded() {
        let mut policy = ReconnectPolicy::new(config(3));

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.attempt_count(), 3);
    }

    #[test]
    fn zero_means_unlimited() {
        let mut policy = ReconnectPolicy::new(config(0));
        for _ in 0..500 {
            assert!(policy.next_delay().is_some());
        }
    }

    #[test]
    fn reset_restarts_the_schedule() {
        let mut policy = ReconnectPolicy::new(config(3));
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_in_range() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1000),
                jitter_factor: 0.1,
                ..config(0)
            });

            let ms = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&ms), "delay {ms}ms out of range");
        }
    }
}
