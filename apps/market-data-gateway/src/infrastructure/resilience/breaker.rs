//! Per-Key Circuit Breaker
//!
//! Tracks consecutive rejection-class failures per request key. The breaker
//! opens after a threshold and auto-resets once the reset window elapses.
//! A separate, shorter cooldown window gates retries even while the breaker
//! is still closed, so a key that failed moments ago is not immediately
//! re-hammered.
//!
//! Only client rejections feed this state; transient transport errors are
//! handled by retry/backoff and never blacklist a key.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the per-key breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures at which the breaker opens.
    pub failure_threshold: u32,
    /// Time after the last failure at which an open breaker auto-resets.
    pub reset_window: Duration,
    /// Short window after any failure during which the key is not retried,
    /// even with the breaker closed.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_window: Duration::from_secs(300),
            cooldown: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Per-key failure state. Created lazily on first failure.
#[derive(Debug, Clone, Copy)]
struct KeyState {
    consecutive_failures: u32,
    last_failure_at: Instant,
    open: bool,
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BreakerStats {
    /// Keys currently holding failure state.
    pub tracked_keys: usize,
    /// Keys with an open breaker.
    pub open_keys: usize,
    /// Breaker-open transitions since startup.
    pub total_opens: u64,
}

// =============================================================================
// Breaker
// =============================================================================

/// Failure-count-based gate over request keys.
pub struct KeyedCircuitBreaker {
    config: BreakerConfig,
    entries: Mutex<HashMap<String, KeyState>>,
    total_opens: Mutex<u64>,
}

impl KeyedCircuitBreaker {
    /// Create a breaker with default windows.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BreakerConfig::default())
    }

    /// Create a breaker with custom windows.
    #[must_use]
    pub fn with_config(config: BreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            total_opens: Mutex::new(0),
        }
    }

    /// Record a rejection-class failure for a key.
    pub fn record_failure(&self, key: &str) {
        let mut entries = self.entries.lock();
        let now = Instant::now();

        let state = entries.entry(key.to_string()).or_insert(KeyState {
            consecutive_failures: 0,
            last_failure_at: now,
            open: false,
        });

        state.consecutive_failures += 1;
        state.last_failure_at = now;

        if !state.open && state.consecutive_failures >= self.config.failure_threshold {
            state.open = true;
            drop(entries);

            *self.total_opens.lock() += 1;
            tracing::warn!(
                key = %key,
                threshold = self.config.failure_threshold,
                "Circuit breaker opened for key"
            );
        }
    }

    /// Record a successful call for a key, clearing its failure run.
    pub fn record_success(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Whether calls for this key should be skipped entirely.
    ///
    /// True only while the breaker is open and the reset window has not
    /// elapsed; crossing the window resets the counter and reports closed.
    pub fn should_skip(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();

        let Some(state) = entries.get(key).copied() else {
            return false;
        };

        if !state.open {
            return false;
        }

        if state.last_failure_at.elapsed() >= self.config.reset_window {
            entries.remove(key);
            tracing::info!(key = %key, "Circuit breaker reset for key");
            return false;
        }

        true
    }

    /// Whether the key failed within the cooldown window.
    ///
    /// Checked even with the breaker closed, to avoid retrying a key that
    /// just failed.
    pub fn is_in_cooldown(&self, key: &str) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|state| state.last_failure_at.elapsed() < self.config.cooldown)
    }

    /// Consecutive failure count for a key (0 when untracked).
    #[must_use]
    pub fn consecutive_failures(&self, key: &str) -> u32 {
        self.entries
            .lock()
            .get(key)
            .map_or(0, |state| state.consecutive_failures)
    }

    /// Diagnostics snapshot.
    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        let entries = self.entries.lock();
        BreakerStats {
            tracked_keys: entries.len(),
            open_keys: entries.values().filter(|s| s.open).count(),
            total_opens: *self.total_opens.lock(),
        }
    }

    /// Drop all breaker state (operator action).
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for KeyedCircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
