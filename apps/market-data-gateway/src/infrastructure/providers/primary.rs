//! Primary Provider Client
//!
//! Request/response HTTP adapter for the primary exchange API. The push
//! feed side of the same provider lives in the stream transport; this
//! client serves quotes, candles, point-in-time books, and exchange rates.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::application::ports::{MarketDataProvider, ProviderError};
use crate::domain::market::{
    Candle, CandlePeriod, ExchangeRate, OrderBookSnapshot, PriceLevel, Quote,
};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the primary HTTP client.
#[derive(Debug, Clone)]
pub struct PrimaryConfig {
    /// REST base URL, without a trailing slash.
    pub base_url: String,
    /// Optional API key sent as `X-API-Key`.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Book depth requested for point-in-time snapshots.
    pub book_depth: u32,
}

impl PrimaryConfig {
    /// Create a configuration with default timeouts.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            request_timeout: Duration::from_secs(10),
            book_depth: 50,
        }
    }
}

// =============================================================================
// Wire Shapes
// =============================================================================

#[derive(Debug, Deserialize)]
struct QuoteBody {
    key: String,
    bid: Decimal,
    ask: Decimal,
    last: Decimal,
    ts: i64,
}

#[derive(Debug, Deserialize)]
struct CandlesBody {
    candles: Vec<(i64, Decimal, Decimal, Decimal, Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
struct BookBody {
    key: String,
    ts: i64,
    bids: Vec<(Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
struct RateBody {
    base: String,
    quote: String,
    rate: Decimal,
    ts: i64,
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

impl From<QuoteBody> for Quote {
    fn from(body: QuoteBody) -> Self {
        Self {
            key: body.key,
            bid: body.bid,
            ask: body.ask,
            last: body.last,
            timestamp: millis_to_utc(body.ts),
        }
    }
}

impl From<BookBody> for OrderBookSnapshot {
    fn from(body: BookBody) -> Self {
        let now = Utc::now();
        let level = |(price, size): (Decimal, Decimal)| PriceLevel { price, size };

        let mut bids: Vec<PriceLevel> = body.bids.into_iter().map(level).collect();
        let mut asks: Vec<PriceLevel> = body.asks.into_iter().map(level).collect();
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        Self {
            key: body.key,
            bids,
            asks,
            exchange_time: millis_to_utc(body.ts),
            ingest_time: now,
        }
    }
}

impl CandlesBody {
    fn into_candles(self) -> Vec<Candle> {
        self.candles
            .into_iter()
            .map(|(ts, open, high, low, close, volume)| Candle {
                open,
                high,
                low,
                close,
                volume,
                timestamp: millis_to_utc(ts),
            })
            .collect()
    }
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the primary provider's REST API.
#[derive(Debug, Clone)]
pub struct PrimaryClient {
    client: reqwest::Client,
    config: PrimaryConfig,
}

impl PrimaryClient {
    /// Create a client from configuration.
    pub fn new(config: PrimaryConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self { client, config })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{path}", self.config.base_url);

        let mut request = self.client.get(&url).query(query);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(status_error(status, message));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        serde_json::from_str(&text).map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

fn status_error(status: StatusCode, message: String) -> ProviderError {
    ProviderError::Status {
        code: status.as_u16(),
        message,
    }
}

#[async_trait]
impl MarketDataProvider for PrimaryClient {
    fn name(&self) -> &str {
        "primary"
    }

    async fn quote(&self, key: &str) -> Result<Quote, ProviderError> {
        let body: QuoteBody = self
            .get_json("/v1/quote", &[("key", key.to_string())])
            .await?;
        Ok(body.into())
    }

    async fn candles(
        &self,
        key: &str,
        period: CandlePeriod,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Candle>, ProviderError> {
        let mut query = vec![
            ("key", key.to_string()),
            ("period", period.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(start) = start {
            query.push(("start", start.timestamp_millis().to_string()));
        }
        if let Some(end) = end {
            query.push(("end", end.timestamp_millis().to_string()));
        }

        let body: CandlesBody = self.get_json("/v1/candles", &query).await?;
        Ok(body.into_candles())
    }

    async fn order_book(&self, key: &str, depth: u32) -> Result<OrderBookSnapshot, ProviderError> {
        let depth = if depth == 0 { self.config.book_depth } else { depth };
        let body: BookBody = self
            .get_json(
                "/v1/book",
                &[("key", key.to_string()), ("depth", depth.to_string())],
            )
            .await?;
        Ok(body.into())
    }

    async fn exchange_rate(
        &self,
        base: &str,
        quote: &str,
    ) -> Result<ExchangeRate, ProviderError> {
        let body: RateBody = self
            .get_json(
                "/v1/rate",
                &[("base", base.to_string()), ("quote", quote.to_string())],
            )
            .await?;
        Ok(ExchangeRate {
            base: body.base,
            quote: body.quote,
            rate: body.rate,
            timestamp: millis_to_utc(body.ts),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_body_decodes_and_converts() {
        let body: QuoteBody = serde_json::from_str(
            r#"{"key":"BTC-USD","bid":"99.5","ask":"100.5","last":"100.0","ts":1700000000000}"#,
        )
        .unwrap();

        let quote: Quote = body.into();
        assert_eq!(quote.key, "BTC-USD");
        assert_eq!(quote.bid, Decimal::new(995, 1));
        assert_eq!(quote.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn candles_body_decodes_rows() {
        let body: CandlesBody = serde_json::from_str(
            r#"{"candles":[[1700000000000,"1","2","0.5","1.5","100"],
                           [1700003600000,"1.5","3","1.4","2.5","80"]]}"#,
        )
        .unwrap();

        let candles = body.into_candles();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open, Decimal::ONE);
        assert_eq!(candles[1].close, Decimal::new(25, 1));
    }

    #[test]
    fn book_body_normalizes_sides() {
        let body: BookBody = serde_json::from_str(
            r#"{"key":"BTC-USD","ts":1700000000000,
                "bids":[["99","1"],["100","1"]],
                "asks":[["102","1"],["101","1"]]}"#,
        )
        .unwrap();

        let book: OrderBookSnapshot = body.into();
        assert_eq!(book.best_bid().unwrap().price, Decimal::from(100));
        assert_eq!(book.best_ask().unwrap().price, Decimal::from(101));
    }

    #[test]
    fn status_errors_map_to_provider_error() {
        let err = status_error(StatusCode::BAD_REQUEST, "bad key".to_string());
        assert!(err.is_rejection());

        let err = status_error(StatusCode::SERVICE_UNAVAILABLE, String::new());
        assert!(err.is_retryable());
    }

    #[test]
    fn bad_timestamp_falls_back_to_now() {
        let converted = millis_to_utc(i64::MAX);
        assert!((Utc::now() - converted).num_seconds().abs() < 5);
    }
}
