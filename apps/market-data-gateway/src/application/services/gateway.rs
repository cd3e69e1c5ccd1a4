//! Market Data Gateway
//!
//! The facade collaborators consume. Composes the streaming ingestion
//! client (low-latency path for order books) with the fallback orchestrator
//! (general-purpose path for quotes, candles, rates, and point-in-time
//! books), and owns the shutdown sequence for everything it spawns.
//!
//! Consumers either get data plus a provenance/quality tag, or a single
//! clear exhaustion error. There is no ambiguous partial result.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{MarketDataProvider, ProviderError, StreamTransport};
use crate::domain::market::{
    Candle, CandlePeriod, DataSource, ExchangeRate, Fetched, OrderBookSnapshot, Quote,
};
use crate::domain::sequence::GapStats;
use crate::domain::validation::Validate;
use crate::infrastructure::config::GatewayConfig;
use crate::infrastructure::metrics;
use crate::infrastructure::resilience::{
    BreakerStats, CallSpec, FallbackOrchestrator, FetchError, HealthStatus, LastGoodCache,
};
use crate::infrastructure::stream::{
    RecoveryHandler, RecoveryScheduler, RecoveryStats, StreamClientError, StreamIngestClient,
    StreamStats,
};

/// Pick the lower-fidelity of two source tiers.
///
/// Used to tag a segmented historical response with the weakest tier any
/// segment came from.
const fn lower_fidelity(a: DataSource, b: DataSource) -> DataSource {
    const fn rank(source: DataSource) -> u8 {
        match source {
            DataSource::Primary => 0,
            DataSource::Secondary => 1,
            DataSource::Cache => 2,
        }
    }
    if rank(b) > rank(a) { b } else { a }
}

// =============================================================================
// Gateway
// =============================================================================

/// Resilient market data gateway.
pub struct MarketDataGateway {
    orchestrator: FallbackOrchestrator,
    primary: Arc<dyn MarketDataProvider>,
    secondary: Option<Arc<dyn MarketDataProvider>>,
    stream: Arc<StreamIngestClient>,
    recovery: Arc<RecoveryScheduler>,
    quote_cache: LastGoodCache<Quote>,
    candle_cache: LastGoodCache<Vec<Candle>>,
    book_cache: LastGoodCache<OrderBookSnapshot>,
    rate_cache: LastGoodCache<ExchangeRate>,
    segment_limit: u32,
    book_depth: u32,
    cancel: CancellationToken,
    shutdown_done: AtomicBool,
}

impl MarketDataGateway {
    /// Assemble a gateway from configuration and injected collaborators.
    #[must_use]
    pub fn new(
        config: &GatewayConfig,
        primary: Arc<dyn MarketDataProvider>,
        secondary: Option<Arc<dyn MarketDataProvider>>,
        transport: Arc<dyn StreamTransport>,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let recovery = RecoveryScheduler::new(config.recovery.clone());
        let stream = StreamIngestClient::new(
            config.stream.clone(),
            transport,
            Arc::clone(&recovery),
            cancel.child_token(),
        );

        Arc::new(Self {
            orchestrator: FallbackOrchestrator::new(config.fallback.clone()),
            primary,
            secondary,
            stream,
            recovery,
            quote_cache: LastGoodCache::new(config.cache_ttl),
            candle_cache: LastGoodCache::new(config.cache_ttl),
            book_cache: LastGoodCache::new(config.cache_ttl),
            rate_cache: LastGoodCache::new(config.cache_ttl),
            segment_limit: config.candle_segment_limit.max(1),
            book_depth: config.providers.book_depth,
            cancel,
            shutdown_done: AtomicBool::new(false),
        })
    }

    /// Start the streaming client and the recovery worker.
    pub fn start(self: &Arc<Self>) {
        let handler = Arc::new(SnapshotRecoveryHandler {
            gateway: Arc::clone(self),
        });
        self.recovery.run(handler, self.cancel.child_token());
        self.stream.start();
    }

    // =========================================================================
    // Request Path
    // =========================================================================

    /// Fetch the freshest available quote for a key.
    pub async fn get_quote(&self, key: &str) -> Result<Fetched<Quote>, FetchError> {
        let spec = CallSpec {
            operation: "quote",
            cache_key: format!("quote:{key}"),
            request_key: Some(key),
        };

        let primary = || {
            let provider = Arc::clone(&self.primary);
            let key = key.to_string();
            async move { provider.quote(&key).await }
        };
        let secondary = self.secondary.as_ref().map(|provider| {
            let provider = Arc::clone(provider);
            move || {
                let provider = Arc::clone(&provider);
                let key = key.to_string();
                async move { provider.quote(&key).await }
            }
        });

        self.orchestrator
            .safe_call(spec, &self.quote_cache, primary, secondary)
            .await
    }

    /// Fetch a spot exchange rate.
    pub async fn get_exchange_rate(
        &self,
        base: &str,
        quote: &str,
    ) -> Result<Fetched<ExchangeRate>, FetchError> {
        let pair = format!("{base}/{quote}");
        let spec = CallSpec {
            operation: "exchange_rate",
            cache_key: format!("rate:{pair}"),
            request_key: Some(&pair),
        };

        let primary = || {
            let provider = Arc::clone(&self.primary);
            let base = base.to_string();
            let quote = quote.to_string();
            async move { provider.exchange_rate(&base, &quote).await }
        };
        let secondary = self.secondary.as_ref().map(|provider| {
            let provider = Arc::clone(provider);
            move || {
                let provider = Arc::clone(&provider);
                let base = base.to_string();
                let quote = quote.to_string();
                async move { provider.exchange_rate(&base, &quote).await }
            }
        });

        self.orchestrator
            .safe_call(spec, &self.rate_cache, primary, secondary)
            .await
    }

    /// Fetch historical candles.
    ///
    /// Requests above the per-call row limit are served by sequential
    /// bounded sub-range fetches, merged, sorted, and deduplicated by
    /// timestamp. The segmentation is invisible to the caller; the source
    /// tag reports the weakest tier any segment came from.
    pub async fn get_historical_data(
        &self,
        key: &str,
        period: CandlePeriod,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Fetched<Vec<Candle>>, FetchError> {
        let limit = limit.max(1);
        if limit <= self.segment_limit {
            return self.fetch_candles(key, period, start, end, limit).await;
        }

        let mut merged: Vec<Candle> = Vec::new();
        let mut source = DataSource::Primary;
        let mut remaining = limit;
        let mut cursor_end = end;
        let mut segments = 0_usize;

        while remaining > 0 {
            let chunk = remaining.min(self.segment_limit);
            let fetched = self
                .fetch_candles(key, period, start, cursor_end, chunk)
                .await?;
            segments += 1;
            source = lower_fidelity(source, fetched.source);

            let batch = fetched.data;
            let earliest = batch.iter().map(|c| c.timestamp).min();
            let exhausted = (batch.len() as u32) < chunk;
            merged.extend(batch);

            if exhausted {
                break;
            }
            remaining -= chunk;

            // The next sub-range ends one period before the earliest row
            // already fetched.
            cursor_end = earliest.map(|t| t - period.duration());
            if let (Some(cursor), Some(start)) = (cursor_end, start)
                && cursor <= start
            {
                break;
            }
        }

        merged.sort_by_key(|c| c.timestamp);
        merged.dedup_by_key(|c| c.timestamp);
        if merged.len() > limit as usize {
            let excess = merged.len() - limit as usize;
            merged.drain(..excess);
        }

        metrics::record_candle_segments(segments);
        tracing::debug!(
            key = %key,
            segments,
            rows = merged.len(),
            "Served segmented historical range"
        );

        let quality = merged.validate();
        Ok(Fetched {
            data: merged,
            quality,
            source,
        })
    }

    async fn fetch_candles(
        &self,
        key: &str,
        period: CandlePeriod,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Fetched<Vec<Candle>>, FetchError> {
        let stamp = |t: Option<DateTime<Utc>>| {
            t.map_or_else(|| "-".to_string(), |t| t.timestamp_millis().to_string())
        };
        let spec = CallSpec {
            operation: "candles",
            cache_key: format!(
                "candles:{key}:{}:{}:{}:{limit}",
                period.as_str(),
                stamp(start),
                stamp(end)
            ),
            request_key: Some(key),
        };

        let primary = || {
            let provider = Arc::clone(&self.primary);
            let key = key.to_string();
            async move { provider.candles(&key, period, start, end, limit).await }
        };
        let secondary = self.secondary.as_ref().map(|provider| {
            let provider = Arc::clone(provider);
            move || {
                let provider = Arc::clone(&provider);
                let key = key.to_string();
                async move { provider.candles(&key, period, start, end, limit).await }
            }
        });

        self.orchestrator
            .safe_call(spec, &self.candle_cache, primary, secondary)
            .await
    }

    // =========================================================================
    // Order Book Path
    // =========================================================================

    /// Current order book for a key.
    ///
    /// Served from the live streaming cache when fresh; otherwise a
    /// point-in-time fetch through the fallback chain, whose result is
    /// installed into the streaming cache. Returns `None` when every tier
    /// is exhausted.
    pub async fn get_order_book(&self, key: &str) -> Option<Fetched<OrderBookSnapshot>> {
        if let Some(snapshot) = self.stream.fresh_snapshot(key) {
            let quality = snapshot.validate();
            return Some(Fetched {
                data: snapshot,
                quality,
                source: DataSource::Primary,
            });
        }

        match self.fetch_order_book(key).await {
            Ok(fetched) => {
                self.stream.install_snapshot(fetched.data.clone());
                Some(fetched)
            }
            Err(FetchError::UpstreamExhausted { .. }) => None,
        }
    }

    async fn fetch_order_book(
        &self,
        key: &str,
    ) -> Result<Fetched<OrderBookSnapshot>, FetchError> {
        let spec = CallSpec {
            operation: "order_book",
            cache_key: format!("book:{key}"),
            request_key: Some(key),
        };
        let depth = self.book_depth;

        let primary = || {
            let provider = Arc::clone(&self.primary);
            let key = key.to_string();
            async move { provider.order_book(&key, depth).await }
        };
        let secondary = self.secondary.as_ref().map(|provider| {
            let provider = Arc::clone(provider);
            move || {
                let provider = Arc::clone(&provider);
                let key = key.to_string();
                async move { provider.order_book(&key, depth).await }
            }
        });

        self.orchestrator
            .safe_call(spec, &self.book_cache, primary, secondary)
            .await
    }

    async fn recover_order_book(&self, key: &str) -> Result<(), ProviderError> {
        let fetched = self.fetch_order_book(key).await.map_err(|e| {
            ProviderError::Unavailable(e.to_string())
        })?;

        // The key may have been unsubscribed while the fetch was in flight;
        // re-check before writing.
        if self.stream.is_subscribed(key) {
            self.stream.install_snapshot(fetched.data);
        } else {
            tracing::debug!(key = %key, "Key unsubscribed during recovery, dropping snapshot");
        }
        Ok(())
    }

    // =========================================================================
    // Subscriptions & Observers
    // =========================================================================

    /// Subscribe keys on the push feed and protect them from eviction.
    pub fn subscribe(&self, keys: &[String]) -> Result<(), StreamClientError> {
        self.stream.subscribe(keys)
    }

    /// Unsubscribe keys from the push feed.
    pub fn unsubscribe(&self, keys: &[String]) {
        self.stream.unsubscribe(keys);
    }

    /// Register a consumer notified synchronously on every applied order
    /// book update.
    pub fn on_order_book_update(
        &self,
        callback: impl Fn(&OrderBookSnapshot) + Send + Sync + 'static,
    ) {
        self.stream.on_order_book_update(callback);
    }

    // =========================================================================
    // Diagnostics (read-only)
    // =========================================================================

    /// Primary provider health. Never mutates state.
    #[must_use]
    pub fn get_health(&self) -> HealthStatus {
        self.orchestrator.primary_health().current()
    }

    /// Secondary provider health. Never mutates state.
    #[must_use]
    pub fn get_secondary_health(&self) -> HealthStatus {
        self.orchestrator.secondary_health().current()
    }

    /// Gap diagnostics. Never mutates state.
    #[must_use]
    pub fn get_gap_stats(&self) -> GapStats {
        self.stream.gap_stats()
    }

    /// Streaming-side counters.
    #[must_use]
    pub fn stream_stats(&self) -> StreamStats {
        self.stream.stats()
    }

    /// Recovery scheduler counters.
    #[must_use]
    pub fn recovery_stats(&self) -> RecoveryStats {
        self.recovery.stats()
    }

    /// Circuit breaker counters.
    #[must_use]
    pub fn breaker_stats(&self) -> BreakerStats {
        self.orchestrator.breaker().stats()
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Tear down every background task and clear in-memory state.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown_done.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("Gateway shutting down");

        // Stop timers and the session loop first, then clear state: a
        // close-triggered reconnect must not race the teardown.
        self.cancel.cancel();
        self.stream.shutdown();

        self.quote_cache.clear();
        self.candle_cache.clear();
        self.book_cache.clear();
        self.rate_cache.clear();
        self.orchestrator.breaker().clear();

        tracing::info!("Gateway shut down");
    }
}

// =============================================================================
// Recovery Wiring
// =============================================================================

struct SnapshotRecoveryHandler {
    gateway: Arc<MarketDataGateway>,
}

#[async_trait]
impl RecoveryHandler for SnapshotRecoveryHandler {
    async fn recover(&self, key: &str) -> Result<(), ProviderError> {
        self.gateway.recover_order_book(key).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rust_decimal::Decimal;

    use crate::application::ports::StreamConnection;
    use crate::domain::market::PriceLevel;
    use crate::infrastructure::resilience::fallback::FallbackConfig;
    use crate::infrastructure::resilience::{
        BreakerConfig, HealthMonitorConfig, RetryPolicy,
    };
    use crate::infrastructure::config::{ProviderSettings, ServerSettings};
    use crate::infrastructure::stream::{RecoveryConfig, StreamSettings};

    struct OfflineTransport;

    #[async_trait]
    impl StreamTransport for OfflineTransport {
        async fn connect(&self) -> Result<Box<dyn StreamConnection>, ProviderError> {
            Err(ProviderError::Unavailable("offline".to_string()))
        }
    }

    /// Deterministic provider used in place of live HTTP clients.
    struct FakeProvider {
        name: &'static str,
        quote_result: Option<Quote>,
        candle_rows: u32,
    }

    impl FakeProvider {
        fn quoting(name: &'static str, quote: Quote) -> Arc<Self> {
            Arc::new(Self {
                name,
                quote_result: Some(quote),
                candle_rows: 0,
            })
        }

        fn with_history(name: &'static str, rows: u32) -> Arc<Self> {
            Arc::new(Self {
                name,
                quote_result: None,
                candle_rows: rows,
            })
        }
    }

    #[async_trait]
    impl MarketDataProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn quote(&self, _key: &str) -> Result<Quote, ProviderError> {
            self.quote_result
                .clone()
                .ok_or_else(|| ProviderError::Unavailable("no quote".to_string()))
        }

        async fn candles(
            &self,
            _key: &str,
            period: CandlePeriod,
            _start: Option<DateTime<Utc>>,
            end: Option<DateTime<Utc>>,
            limit: u32,
        ) -> Result<Vec<Candle>, ProviderError> {
            // Emit `limit` rows ending at the cursor, newest last.
            let end = end.unwrap_or_else(Utc::now);
            let rows = limit.min(self.candle_rows);
            Ok((0..rows)
                .map(|i| {
                    let offset = i64::from(rows - 1 - i);
                    Candle {
                        open: Decimal::ONE,
                        high: Decimal::from(2),
                        low: Decimal::ONE,
                        close: Decimal::from(2),
                        volume: Decimal::from(10),
                        timestamp: end - period.duration() * (offset as i32),
                    }
                })
                .collect())
        }

        async fn order_book(
            &self,
            key: &str,
            _depth: u32,
        ) -> Result<OrderBookSnapshot, ProviderError> {
            Ok(OrderBookSnapshot {
                key: key.to_string(),
                bids: vec![PriceLevel {
                    price: Decimal::from(100),
                    size: Decimal::ONE,
                }],
                asks: vec![PriceLevel {
                    price: Decimal::from(101),
                    size: Decimal::ONE,
                }],
                exchange_time: Utc::now(),
                ingest_time: Utc::now(),
            })
        }

        async fn exchange_rate(
            &self,
            base: &str,
            quote: &str,
        ) -> Result<ExchangeRate, ProviderError> {
            Ok(ExchangeRate {
                base: base.to_string(),
                quote: quote.to_string(),
                rate: Decimal::from(42),
                timestamp: Utc::now(),
            })
        }
    }

    fn quote(key: &str) -> Quote {
        Quote {
            key: key.to_string(),
            bid: Decimal::from(100),
            ask: Decimal::from(101),
            last: Decimal::from(100),
            timestamp: Utc::now(),
        }
    }

    fn test_config(segment_limit: u32) -> GatewayConfig {
        GatewayConfig {
            providers: ProviderSettings {
                primary_api_url: "http://localhost:0".to_string(),
                primary_ws_url: "ws://localhost:0".to_string(),
                primary_credentials: None,
                secondary_api_url: None,
                request_timeout: Duration::from_secs(1),
                book_depth: 10,
            },
            stream: StreamSettings::default(),
            recovery: RecoveryConfig::default(),
            fallback: FallbackConfig {
                retry: RetryPolicy {
                    initial_backoff: Duration::from_millis(1),
                    max_backoff: Duration::from_millis(2),
                    jitter_factor: 0.0,
                    ..RetryPolicy::default()
                },
                breaker: BreakerConfig::default(),
                health: HealthMonitorConfig {
                    check_interval: Duration::ZERO,
                    ..Default::default()
                },
            },
            cache_ttl: Duration::from_secs(30),
            candle_segment_limit: segment_limit,
            server: ServerSettings::default(),
        }
    }

    fn gateway_with(
        primary: Arc<dyn MarketDataProvider>,
        segment_limit: u32,
    ) -> Arc<MarketDataGateway> {
        MarketDataGateway::new(
            &test_config(segment_limit),
            primary,
            None,
            Arc::new(OfflineTransport),
        )
    }

    #[tokio::test]
    async fn quote_rides_the_safe_call_path() {
        let gateway = gateway_with(FakeProvider::quoting("primary", quote("BTC-USD")), 500);

        let fetched = gateway.get_quote("BTC-USD").await.unwrap();
        assert_eq!(fetched.source, DataSource::Primary);
        assert!(fetched.quality.is_valid);
        assert_eq!(fetched.data.key, "BTC-USD");
    }

    #[tokio::test]
    async fn exchange_rate_rides_the_safe_call_path() {
        let gateway = gateway_with(FakeProvider::with_history("primary", 0), 500);

        let fetched = gateway.get_exchange_rate("BTC", "USD").await.unwrap();
        assert_eq!(fetched.data.rate, Decimal::from(42));
        assert_eq!(fetched.source, DataSource::Primary);
    }

    #[tokio::test]
    async fn small_historical_request_is_a_single_fetch() {
        let gateway = gateway_with(FakeProvider::with_history("primary", 1_000), 500);

        let fetched = gateway
            .get_historical_data("BTC-USD", CandlePeriod::H1, None, None, 100)
            .await
            .unwrap();

        assert_eq!(fetched.data.len(), 100);
        assert!(fetched.quality.is_valid);
    }

    #[tokio::test]
    async fn oversized_range_is_segmented_and_merged() {
        let gateway = gateway_with(FakeProvider::with_history("primary", 1_000), 40);

        let fetched = gateway
            .get_historical_data("BTC-USD", CandlePeriod::H1, None, None, 100)
            .await
            .unwrap();

        // Rows merged across segments, sorted and deduplicated, capped at
        // the requested limit.
        assert_eq!(fetched.data.len(), 100);
        let timestamps: Vec<_> = fetched.data.iter().map(|c| c.timestamp).collect();
        let mut sorted = timestamps.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(timestamps, sorted);
        assert_eq!(fetched.source, DataSource::Primary);
    }

    #[tokio::test]
    async fn segmentation_stops_when_history_runs_out() {
        // Provider holds fewer rows than one full chunk.
        let gateway = gateway_with(FakeProvider::with_history("primary", 30), 40);

        let fetched = gateway
            .get_historical_data("BTC-USD", CandlePeriod::H1, None, None, 100)
            .await
            .unwrap();

        assert_eq!(fetched.data.len(), 30);
    }

    #[tokio::test]
    async fn order_book_falls_back_to_point_in_time_fetch() {
        let gateway = gateway_with(FakeProvider::with_history("primary", 0), 500);

        // No streaming snapshot exists yet, so the gateway fetches one.
        let fetched = gateway.get_order_book("BTC-USD").await.unwrap();
        assert_eq!(fetched.data.key, "BTC-USD");

        // The fetched snapshot was installed into the streaming cache and
        // now serves as the fresh live copy.
        let again = gateway.get_order_book("BTC-USD").await.unwrap();
        assert_eq!(again.source, DataSource::Primary);
        assert_eq!(gateway.stream_stats().snapshot_count, 1);
    }

    #[tokio::test]
    async fn diagnostics_reads_do_not_mutate() {
        let gateway = gateway_with(FakeProvider::quoting("primary", quote("BTC-USD")), 500);

        let before = gateway.get_gap_stats();
        let _ = gateway.get_health();
        let _ = gateway.stream_stats();
        let after = gateway.get_gap_stats();

        assert_eq!(before.total_gaps_detected, after.total_gaps_detected);
        assert_eq!(before.recovery_triggered, after.recovery_triggered);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let gateway = gateway_with(FakeProvider::quoting("primary", quote("BTC-USD")), 500);
        gateway.subscribe(&["BTC-USD".to_string()]).unwrap();

        gateway.shutdown();
        gateway.shutdown();

        assert_eq!(gateway.stream_stats().subscription_count, 0);
    }
}
