//! Prometheus Metrics Module
//!
//! Exposes gateway metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: frames ingested, dropped, and processed per batch
//! - **Gaps**: sequence gaps detected and recovery jobs run
//! - **Fallback**: fetch outcomes per tier, exhaustions, breaker skips
//! - **Providers**: upstream call latency and errors per provider
//! - **Stream**: connection state, subscription and snapshot gauges
//!
//! # Integration
//!
//! Metrics are rendered at `/metrics` on the ops server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::market::DataSource;
use crate::infrastructure::stream::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_gateway_messages_ingested_total",
        "Frames accepted by the ingress queue"
    );
    describe_counter!(
        "market_gateway_messages_dropped_total",
        "Frames discarded by drop-oldest backpressure"
    );
    describe_counter!(
        "market_gateway_messages_processed_total",
        "Frames decoded and applied by the batch processor"
    );
    describe_counter!(
        "market_gateway_gaps_detected_total",
        "Sequence gaps observed across all keys"
    );
    describe_counter!(
        "market_gateway_recoveries_total",
        "Recovery jobs scheduled and their outcomes"
    );
    describe_counter!(
        "market_gateway_fetch_total",
        "Safe-call results by operation and source tier"
    );
    describe_counter!(
        "market_gateway_fetch_exhausted_total",
        "Safe-calls that exhausted every fallback tier"
    );
    describe_counter!(
        "market_gateway_breaker_skips_total",
        "Primary attempts skipped by breaker or cooldown"
    );
    describe_counter!(
        "market_gateway_provider_calls_total",
        "Upstream calls by provider and outcome"
    );
    describe_counter!(
        "market_gateway_reconnects_total",
        "Stream reconnection attempts"
    );
    describe_counter!(
        "market_gateway_evictions_total",
        "Snapshots removed by the eviction sweep"
    );
    describe_counter!(
        "market_gateway_candle_segments_total",
        "Sub-range fetches performed by historical segmentation"
    );

    describe_gauge!(
        "market_gateway_connection_state",
        "Stream connection state (0=disconnected 1=connecting 2=connected 3=reconnecting)"
    );
    describe_gauge!(
        "market_gateway_subscriptions",
        "Keys in the stream subscription set"
    );
    describe_gauge!(
        "market_gateway_snapshots",
        "Order book snapshots currently cached"
    );

    describe_histogram!(
        "market_gateway_provider_latency_seconds",
        "Upstream call latency per provider"
    );
    describe_histogram!(
        "market_gateway_batch_processing_seconds",
        "Time to process one ingress batch"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame accepted by the ingress queue.
pub fn record_message_ingested() {
    counter!("market_gateway_messages_ingested_total").increment(1);
}

/// Record a frame discarded by drop-oldest backpressure.
pub fn record_message_dropped() {
    counter!("market_gateway_messages_dropped_total").increment(1);
}

/// Record one processed ingress batch.
pub fn record_batch_processed(count: usize, duration: Duration) {
    counter!("market_gateway_messages_processed_total").increment(count as u64);
    histogram!("market_gateway_batch_processing_seconds").record(duration.as_secs_f64());
}

/// Record a detected sequence gap.
pub fn record_gap() {
    counter!("market_gateway_gaps_detected_total").increment(1);
}

/// Record a recovery job entering the queue.
pub fn record_recovery_scheduled() {
    counter!("market_gateway_recoveries_total", "outcome" => "scheduled").increment(1);
}

/// Record a finished recovery job.
pub fn record_recovery_result(success: bool) {
    let outcome = if success { "completed" } else { "failed" };
    counter!("market_gateway_recoveries_total", "outcome" => outcome).increment(1);
}

/// Record a safe-call result by tier.
pub fn record_fetch(operation: &str, source: DataSource) {
    counter!(
        "market_gateway_fetch_total",
        "operation" => operation.to_string(),
        "source" => source.to_string()
    )
    .increment(1);
}

/// Record a safe-call that exhausted every tier.
pub fn record_fetch_exhausted(operation: &str) {
    counter!(
        "market_gateway_fetch_exhausted_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a primary attempt skipped by the breaker or cooldown.
pub fn record_breaker_skip() {
    counter!("market_gateway_breaker_skips_total").increment(1);
}

/// Record one upstream provider call.
pub fn record_provider_call(provider: &str, latency: Duration, is_error: bool) {
    let outcome = if is_error { "error" } else { "ok" };
    counter!(
        "market_gateway_provider_calls_total",
        "provider" => provider.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "market_gateway_provider_latency_seconds",
        "provider" => provider.to_string()
    )
    .record(latency.as_secs_f64());
}

/// Record a stream reconnection attempt.
pub fn record_reconnect() {
    counter!("market_gateway_reconnects_total").increment(1);
}

/// Record snapshots removed by the eviction sweep.
pub fn record_evictions(count: usize) {
    counter!("market_gateway_evictions_total").increment(count as u64);
}

/// Record sub-range fetches performed by historical segmentation.
pub fn record_candle_segments(count: usize) {
    counter!("market_gateway_candle_segments_total").increment(count as u64);
}

/// Update the stream connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    let value = match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Reconnecting => 3.0,
    };
    gauge!("market_gateway_connection_state").set(value);
}

/// Update the subscription count gauge.
pub fn set_subscription_count(count: usize) {
    gauge!("market_gateway_subscriptions").set(count as f64);
}

/// Update the snapshot count gauge.
pub fn set_snapshot_count(count: usize) {
    gauge!("market_gateway_snapshots").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
