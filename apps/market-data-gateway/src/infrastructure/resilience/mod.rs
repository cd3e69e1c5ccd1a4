//! Resilience primitives for the request path.
//!
//! The fallback orchestrator composes the breaker, health monitor, retry
//! policy, and last-known-good cache into the single "safe call" path every
//! request-type operation goes through.

/// Per-key circuit breaker with reset and cooldown windows.
pub mod breaker;

/// Last-known-good TTL cache.
pub mod cache;

/// The safe-call fallback chain.
pub mod fallback;

/// Rolling-window provider health classification.
pub mod monitor;

/// Retry policy and exponential backoff.
pub mod retry;

pub use breaker::{BreakerConfig, BreakerStats, KeyedCircuitBreaker};
pub use cache::{CachedEntry, LastGoodCache};
pub use fallback::{CallSpec, FallbackConfig, FallbackOrchestrator, FetchError};
pub use monitor::{HealthMonitorConfig, HealthStatus, ProviderHealthMonitor, ProviderStatus};
pub use retry::{Backoff, RetryPolicy};
