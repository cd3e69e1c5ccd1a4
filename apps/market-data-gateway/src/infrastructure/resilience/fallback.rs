//! Fallback Orchestration ("safe call")
//!
//! Composes the breaker, health monitor, retry policy, validator, and
//! last-known-good cache into one call path:
//!
//! ```text
//! breaker/cooldown gate
//!   └─► primary (bounded retry, validated) ──► cache write, source=primary
//!         └─► secondary (translated, validated) ──► cache write, source=secondary
//!               └─► last-known-good cache ──► source=cache
//!                     └─► UpstreamExhausted
//! ```
//!
//! The behavioral contract: every call either returns quality-tagged data
//! with a known provenance, or fails loudly. Unvalidated data never passes
//! through.

use std::future::Future;
use std::time::Instant;

use crate::application::ports::ProviderError;
use crate::domain::market::{DataSource, Fetched};
use crate::domain::validation::Validate;
use crate::infrastructure::metrics;

use super::breaker::{BreakerConfig, KeyedCircuitBreaker};
use super::cache::LastGoodCache;
use super::monitor::{HealthMonitorConfig, ProviderHealthMonitor, ProviderStatus};
use super::retry::{Backoff, RetryPolicy};

// =============================================================================
// Errors
// =============================================================================

/// Terminal failure of the full fallback chain.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Primary, secondary, and cache tiers all failed to produce data.
    #[error("all fallback tiers exhausted for {operation} on {key}")]
    UpstreamExhausted {
        /// The logical operation that failed.
        operation: String,
        /// The composite cache key of the failed request.
        key: String,
    },
}

// =============================================================================
// Call Specification
// =============================================================================

/// Identity of one orchestrated call.
#[derive(Debug, Clone)]
pub struct CallSpec<'a> {
    /// Logical operation name (metrics/log label).
    pub operation: &'a str,
    /// Composite cache key: one entry per operation + parameters.
    pub cache_key: String,
    /// Request key for breaker/cooldown gating, when the operation has one.
    pub request_key: Option<&'a str>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Configuration bundle for the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct FallbackConfig {
    /// Retry policy for the primary attempt.
    pub retry: RetryPolicy,
    /// Per-key breaker windows.
    pub breaker: BreakerConfig,
    /// Health classification thresholds (applied to both providers).
    pub health: HealthMonitorConfig,
}

/// Wraps any single upstream call with health gating, per-key breaking,
/// bounded retry, secondary fallback, and the last-known-good cache.
pub struct FallbackOrchestrator {
    retry: RetryPolicy,
    breaker: KeyedCircuitBreaker,
    primary_health: ProviderHealthMonitor,
    secondary_health: ProviderHealthMonitor,
}

impl FallbackOrchestrator {
    /// Create an orchestrator from configuration.
    #[must_use]
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            retry: config.retry,
            breaker: KeyedCircuitBreaker::with_config(config.breaker),
            primary_health: ProviderHealthMonitor::with_config("primary", config.health.clone()),
            secondary_health: ProviderHealthMonitor::with_config("secondary", config.health),
        }
    }

    /// Health monitor for the primary provider.
    #[must_use]
    pub const fn primary_health(&self) -> &ProviderHealthMonitor {
        &self.primary_health
    }

    /// Health monitor for the secondary provider.
    #[must_use]
    pub const fn secondary_health(&self) -> &ProviderHealthMonitor {
        &self.secondary_health
    }

    /// The per-key circuit breaker.
    #[must_use]
    pub const fn breaker(&self) -> &KeyedCircuitBreaker {
        &self.breaker
    }

    /// Run one call through the full fallback chain.
    pub async fn safe_call<T, PFut, SFut>(
        &self,
        spec: CallSpec<'_>,
        cache: &LastGoodCache<T>,
        primary: impl Fn() -> PFut,
        secondary: Option<impl Fn() -> SFut>,
    ) -> Result<Fetched<T>, FetchError>
    where
        T: Validate + Clone,
        PFut: Future<Output = Result<T, ProviderError>>,
        SFut: Future<Output = Result<T, ProviderError>>,
    {
        if let Some(result) = self.try_primary(&spec, cache, &primary).await {
            return Ok(result);
        }

        if let Some(call) = secondary {
            if let Some(result) = self.try_secondary(&spec, cache, &call).await {
                return Ok(result);
            }
        }

        if let Some(entry) = cache.get(&spec.cache_key) {
            tracing::info!(
                operation = spec.operation,
                key = %spec.cache_key,
                "Serving last-known-good cache entry"
            );
            metrics::record_fetch(spec.operation, DataSource::Cache);
            return Ok(Fetched {
                data: entry.data,
                quality: entry.quality,
                source: DataSource::Cache,
            });
        }

        metrics::record_fetch_exhausted(spec.operation);
        tracing::error!(
            operation = spec.operation,
            key = %spec.cache_key,
            "All fallback tiers exhausted"
        );
        Err(FetchError::UpstreamExhausted {
            operation: spec.operation.to_string(),
            key: spec.cache_key,
        })
    }

    /// Attempt the primary provider with bounded retry.
    ///
    /// Returns `None` on any terminal failure so the caller falls through to
    /// the next tier.
    async fn try_primary<T, PFut>(
        &self,
        spec: &CallSpec<'_>,
        cache: &LastGoodCache<T>,
        primary: &impl Fn() -> PFut,
    ) -> Option<Fetched<T>>
    where
        T: Validate + Clone,
        PFut: Future<Output = Result<T, ProviderError>>,
    {
        if let Some(key) = spec.request_key {
            if self.breaker.should_skip(key) {
                tracing::debug!(key = %key, operation = spec.operation, "Breaker open, skipping primary");
                metrics::record_breaker_skip();
                return None;
            }
            if self.breaker.is_in_cooldown(key) {
                tracing::debug!(key = %key, operation = spec.operation, "Key in cooldown, skipping primary");
                metrics::record_breaker_skip();
                return None;
            }
        }

        if self.primary_health.check().status == ProviderStatus::Down {
            tracing::warn!(operation = spec.operation, "Primary provider down, skipping");
            return None;
        }

        let mut backoff = Backoff::new(&self.retry);

        loop {
            let started = Instant::now();
            match primary().await {
                Ok(payload) => {
                    let latency = started.elapsed();
                    self.primary_health.record(latency, false);
                    metrics::record_provider_call("primary", latency, false);

                    let verdict = payload.validate();
                    if verdict.is_valid {
                        if let Some(key) = spec.request_key {
                            self.breaker.record_success(key);
                        }
                        cache.put(
                            &spec.cache_key,
                            payload.clone(),
                            verdict.clone(),
                            DataSource::Primary,
                        );
                        metrics::record_fetch(spec.operation, DataSource::Primary);
                        return Some(Fetched {
                            data: payload,
                            quality: verdict,
                            source: DataSource::Primary,
                        });
                    }

                    // Data-shape problems are not transient; fall through
                    // without retrying this tier.
                    tracing::warn!(
                        operation = spec.operation,
                        errors = ?verdict.errors,
                        "Primary payload failed validation"
                    );
                    return None;
                }
                Err(err) => {
                    let latency = started.elapsed();
                    self.primary_health.record(latency, true);
                    metrics::record_provider_call("primary", latency, true);

                    if err.is_rejection() {
                        if let Some(key) = spec.request_key {
                            self.breaker.record_failure(key);
                        }
                        tracing::warn!(
                            operation = spec.operation,
                            error = %err,
                            "Primary rejected request, aborting retries"
                        );
                        return None;
                    }

                    if err.is_retryable()
                        && let Some(delay) = backoff.next_delay()
                    {
                        tracing::warn!(
                            operation = spec.operation,
                            error = %err,
                            attempt = backoff.attempt(),
                            delay_ms = delay.as_millis(),
                            "Retryable primary error, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    tracing::warn!(
                        operation = spec.operation,
                        error = %err,
                        "Primary attempts exhausted"
                    );
                    return None;
                }
            }
        }
    }

    /// Attempt the secondary provider once.
    ///
    /// Failures here are absorbed and logged; they never propagate past this
    /// tier.
    async fn try_secondary<T, SFut>(
        &self,
        spec: &CallSpec<'_>,
        cache: &LastGoodCache<T>,
        secondary: &impl Fn() -> SFut,
    ) -> Option<Fetched<T>>
    where
        T: Validate + Clone,
        SFut: Future<Output = Result<T, ProviderError>>,
    {
        let started = Instant::now();
        match secondary().await {
            Ok(payload) => {
                let latency = started.elapsed();
                self.secondary_health.record(latency, false);
                metrics::record_provider_call("secondary", latency, false);

                let verdict = payload.validate();
                if verdict.is_valid {
                    cache.put(
                        &spec.cache_key,
                        payload.clone(),
                        verdict.clone(),
                        DataSource::Secondary,
                    );
                    metrics::record_fetch(spec.operation, DataSource::Secondary);
                    return Some(Fetched {
                        data: payload,
                        quality: verdict,
                        source: DataSource::Secondary,
                    });
                }

                tracing::warn!(
                    operation = spec.operation,
                    errors = ?verdict.errors,
                    "Secondary payload failed validation"
                );
                None
            }
            Err(err) => {
                let latency = started.elapsed();
                self.secondary_health.record(latency, true);
                metrics::record_provider_call("secondary", latency, true);

                tracing::warn!(
                    operation = spec.operation,
                    error = %err,
                    "Secondary provider failed"
                );
                None
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
