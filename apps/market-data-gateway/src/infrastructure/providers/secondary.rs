//! Secondary Provider Client
//!
//! Fallback HTTP adapter with a structurally different wire shape. The
//! translation functions in this module are the single boundary where the
//! secondary's field-name variance is tolerated (`last_price` or `last` or
//! `price`, `rate` or `price`, epoch or ISO timestamps); canonical records
//! leave this module and nothing else in the gateway sees the native shape.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use crate::application::ports::{MarketDataProvider, ProviderError};
use crate::domain::market::{
    Candle, CandlePeriod, ExchangeRate, OrderBookSnapshot, PriceLevel, Quote,
};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the secondary HTTP client.
#[derive(Debug, Clone)]
pub struct SecondaryConfig {
    /// REST base URL, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl SecondaryConfig {
    /// Create a configuration with default timeouts.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Translation Helpers
// =============================================================================

fn pick<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| value.get(name))
}

fn decimal_from(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => n.as_f64().and_then(|f| Decimal::try_from(f).ok()),
        _ => None,
    }
}

fn decimal_field(value: &Value, names: &[&str]) -> Result<Decimal, ProviderError> {
    pick(value, names)
        .and_then(decimal_from)
        .ok_or_else(|| ProviderError::Decode(format!("missing numeric field {names:?}")))
}

fn time_field(value: &Value, names: &[&str]) -> DateTime<Utc> {
    let Some(raw) = pick(value, names) else {
        return Utc::now();
    };

    match raw {
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now),
        Value::String(s) => s
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
        _ => Utc::now(),
    }
}

// =============================================================================
// Translation Functions
// =============================================================================

/// Translate the secondary's ticker shape into a canonical quote.
pub fn translate_ticker(key: &str, body: &Value) -> Result<Quote, ProviderError> {
    let data = body.get("data").unwrap_or(body);

    Ok(Quote {
        key: key.to_string(),
        bid: decimal_field(data, &["buy", "bid"])?,
        ask: decimal_field(data, &["sell", "ask"])?,
        last: decimal_field(data, &["last_price", "last", "price"])?,
        timestamp: time_field(data, &["timestamp", "time", "updated"]),
    })
}

/// Translate the secondary's history shape into canonical candles.
pub fn translate_history(body: &Value) -> Result<Vec<Candle>, ProviderError> {
    let rows = pick(body, &["candles", "history", "data"])
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Decode("missing candle array".to_string()))?;

    rows.iter()
        .map(|row| {
            Ok(Candle {
                open: decimal_field(row, &["price_open", "open", "o"])?,
                high: decimal_field(row, &["price_high", "high", "h"])?,
                low: decimal_field(row, &["price_low", "low", "l"])?,
                close: decimal_field(row, &["price_close", "close", "c"])?,
                volume: decimal_field(row, &["vol", "volume", "v"]).unwrap_or(Decimal::ZERO),
                timestamp: time_field(row, &["time", "timestamp", "t"]),
            })
        })
        .collect()
}

/// Translate the secondary's depth shape into a canonical snapshot.
pub fn translate_depth(key: &str, body: &Value) -> Result<OrderBookSnapshot, ProviderError> {
    let side = |names: &[&str]| -> Result<Vec<PriceLevel>, ProviderError> {
        let rows = pick(body, names)
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Decode(format!("missing book side {names:?}")))?;

        rows.iter()
            .map(|row| {
                Ok(PriceLevel {
                    price: decimal_field(row, &["rate", "price", "p"])?,
                    size: decimal_field(row, &["amount", "quantity", "qty", "size"])?,
                })
            })
            .collect()
    };

    let mut bids = side(&["buy_orders", "bids"])?;
    let mut asks = side(&["sell_orders", "asks"])?;
    bids.sort_by(|a, b| b.price.cmp(&a.price));
    asks.sort_by(|a, b| a.price.cmp(&b.price));

    let now = Utc::now();
    Ok(OrderBookSnapshot {
        key: key.to_string(),
        bids,
        asks,
        exchange_time: time_field(body, &["timestamp", "time", "updated"]),
        ingest_time: now,
    })
}

/// Translate the secondary's fx shape into a canonical exchange rate.
pub fn translate_fx(base: &str, quote: &str, body: &Value) -> Result<ExchangeRate, ProviderError> {
    Ok(ExchangeRate {
        base: base.to_string(),
        quote: quote.to_string(),
        rate: decimal_field(body, &["value", "rate", "price"])?,
        timestamp: time_field(body, &["updated", "timestamp", "time"]),
    })
}

fn period_to_interval(period: CandlePeriod) -> &'static str {
    // The secondary spells intervals differently from the canonical names.
    match period {
        CandlePeriod::M1 => "minute",
        CandlePeriod::M5 => "5minute",
        CandlePeriod::M15 => "15minute",
        CandlePeriod::H1 => "hour",
        CandlePeriod::H4 => "4hour",
        CandlePeriod::D1 => "day",
    }
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the secondary provider's REST API.
#[derive(Debug, Clone)]
pub struct SecondaryClient {
    client: reqwest::Client,
    config: SecondaryConfig,
}

impl SecondaryClient {
    /// Create a client from configuration.
    pub fn new(config: SecondaryConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self { client, config })
    }

    async fn get_value(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ProviderError> {
        let url = format!("{}{path}", self.config.base_url);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                code: status.as_u16(),
                message,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        serde_json::from_str(&text).map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MarketDataProvider for SecondaryClient {
    fn name(&self) -> &str {
        "secondary"
    }

    async fn quote(&self, key: &str) -> Result<Quote, ProviderError> {
        let body = self
            .get_value(&format!("/api/v2/ticker/{key}"), &[])
            .await?;
        translate_ticker(key, &body)
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
            ("interval", period_to_interval(period).to_string()),
            ("size", limit.to_string()),
        ];
        if let Some(start) = start {
            query.push(("from", start.timestamp_millis().to_string()));
        }
        if let Some(end) = end {
            query.push(("to", end.timestamp_millis().to_string()));
        }

        let body = self
            .get_value(&format!("/api/v2/history/{key}"), &query)
            .await?;
        translate_history(&body)
    }

    async fn order_book(&self, key: &str, depth: u32) -> Result<OrderBookSnapshot, ProviderError> {
        let body = self
            .get_value(
                &format!("/api/v2/depth/{key}"),
                &[("limit", depth.to_string())],
            )
            .await?;
        translate_depth(key, &body)
    }

    async fn exchange_rate(
        &self,
        base: &str,
        quote: &str,
    ) -> Result<ExchangeRate, ProviderError> {
        let body = self
            .get_value(
                "/api/v2/fx",
                &[("from", base.to_string()), ("to", quote.to_string())],
            )
            .await?;
        translate_fx(base, quote, &body)
    }
}

// =============================================================================
// Tests
// =============================================================================
