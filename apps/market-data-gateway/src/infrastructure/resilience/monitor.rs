//! Provider Health Monitoring
//!
//! Rolling-window latency/error tracker per upstream provider. Every
//! completed call records into a fixed-size window; `check()` is throttled
//! and recomputes the classification at most once per interval, returning
//! the cached status in between. Reads never mutate anything.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for provider health classification.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Number of calls kept in the rolling window.
    pub window_size: usize,
    /// Minimum interval between status recomputations.
    pub check_interval: Duration,
    /// p95 latency above which the provider is degraded.
    pub latency_threshold: Duration,
    /// Error rate above which the provider is degraded (0.0-1.0).
    pub degraded_error_rate: f64,
    /// Error rate above which the provider is down (0.0-1.0).
    pub down_error_rate: f64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            check_interval: Duration::from_secs(30),
            latency_threshold: Duration::from_millis(700),
            degraded_error_rate: 0.2,
            down_error_rate: 0.5,
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Provider health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    /// Operating within thresholds.
    Healthy,
    /// Elevated latency or error rate; still attempted.
    Degraded,
    /// Error rate too high; the request path skips this provider.
    Down,
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Snapshot of a provider's health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Provider name.
    pub provider: String,
    /// Current classification.
    pub status: ProviderStatus,
    /// p95 latency over the window, in milliseconds.
    pub p95_latency_ms: u64,
    /// Mean latency over the window, in milliseconds.
    pub avg_latency_ms: u64,
    /// Error rate over the window (0.0-1.0).
    pub error_rate: f64,
    /// Reason for a non-healthy classification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the status was last recomputed.
    pub last_check: DateTime<Utc>,
}

impl HealthStatus {
    fn initial(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            status: ProviderStatus::Healthy,
            p95_latency_ms: 0,
            avg_latency_ms: 0,
            error_rate: 0.0,
            reason: None,
            last_check: Utc::now(),
        }
    }
}

// =============================================================================
// Monitor
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct CallSample {
    latency: Duration,
    is_error: bool,
}

struct MonitorState {
    window: VecDeque<CallSample>,
    cached: HealthStatus,
    last_recompute: Option<Instant>,
    total_calls: u64,
    total_errors: u64,
}

/// Rolling-window health tracker for one upstream provider.
pub struct ProviderHealthMonitor {
    provider: String,
    config: HealthMonitorConfig,
    state: Mutex<MonitorState>,
}

impl ProviderHealthMonitor {
    /// Create a monitor for a provider with default thresholds.
    #[must_use]
    pub fn new(provider: &str) -> Self {
        Self::with_config(provider, HealthMonitorConfig::default())
    }

    /// Create a monitor with custom thresholds.
    #[must_use]
    pub fn with_config(provider: &str, config: HealthMonitorConfig) -> Self {
        Self {
            provider: provider.to_string(),
            config,
            state: Mutex::new(MonitorState {
                window: VecDeque::new(),
                cached: HealthStatus::initial(provider),
                last_recompute: None,
                total_calls: 0,
                total_errors: 0,
            }),
        }
    }

    /// Record one completed call.
    pub fn record(&self, latency: Duration, is_error: bool) {
        let mut state = self.state.lock();

        state.window.push_back(CallSample { latency, is_error });
        while state.window.len() > self.config.window_size {
            state.window.pop_front();
        }

        state.total_calls += 1;
        if is_error {
            state.total_errors += 1;
        }
    }

    /// Return the health status, recomputing at most once per interval.
    ///
    /// Between intervals this is a cached read; it is a throttle, not a live
    /// computation on every call.
    pub fn check(&self) -> HealthStatus {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let due = match state.last_recompute {
            None => true,
            Some(at) => at.elapsed() >= self.config.check_interval,
        };

        if due {
            state.cached = self.classify(&state.window);
            state.last_recompute = Some(Instant::now());
        }

        state.cached.clone()
    }

    /// The cached status without any recomputation.
    ///
    /// Diagnostics read path; never mutates.
    #[must_use]
    pub fn current(&self) -> HealthStatus {
        self.state.lock().cached.clone()
    }

    /// Provider name.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Lifetime call counters: `(total_calls, total_errors)`.
    #[must_use]
    pub fn counters(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.total_calls, state.total_errors)
    }

    fn classify(&self, window: &VecDeque<CallSample>) -> HealthStatus {
        if window.is_empty() {
            return HealthStatus::initial(&self.provider);
        }

        let errors = window.iter().filter(|s| s.is_error).count();
        let error_rate = errors as f64 / window.len() as f64;

        // Full sort is fine at this window size.
        let mut latencies: Vec<Duration> = window.iter().map(|s| s.latency).collect();
        latencies.sort();

        let p95_index = ((latencies.len() as f64) * 0.95).ceil() as usize;
        let p95 = latencies[p95_index.saturating_sub(1).min(latencies.len() - 1)];

        let total: Duration = latencies.iter().sum();
        let avg = total / latencies.len() as u32;

        let (status, reason) = if error_rate > self.config.down_error_rate {
            (
                ProviderStatus::Down,
                Some(format!("error rate {:.0}%", error_rate * 100.0)),
            )
        } else if p95 > self.config.latency_threshold {
            (
                ProviderStatus::Degraded,
                Some(format!("p95 latency {}ms", p95.as_millis())),
            )
        } else if error_rate > self.config.degraded_error_rate {
            (
                ProviderStatus::Degraded,
                Some(format!("error rate {:.0}%", error_rate * 100.0)),
            )
        } else {
            (ProviderStatus::Healthy, None)
        };

        if status != ProviderStatus::Healthy {
            tracing::warn!(
                provider = %self.provider,
                status = %status,
                error_rate,
                p95_ms = p95.as_millis(),
                "Provider health degraded"
            );
        }

        HealthStatus {
            provider: self.provider.clone(),
            status,
            p95_latency_ms: p95.as_millis() as u64,
            avg_latency_ms: avg.as_millis() as u64,
            error_rate,
            reason,
            last_check: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
