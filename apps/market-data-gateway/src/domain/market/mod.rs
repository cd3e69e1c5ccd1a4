//! Canonical Market Data Types
//!
//! Every upstream provider's native shape is translated into these records
//! at its own boundary; everything downstream of the translation sees only
//! the types in this module.
//!
//! # Provenance
//!
//! Responses returned to consumers are wrapped in [`Fetched`], carrying the
//! [`DataSource`] tier that produced them and the [`QualityVerdict`] the
//! payload was validated with. There is no unvalidated path to a consumer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Keys and Tags
// =============================================================================

/// Identifier for one logical data stream (e.g. an exchange/symbol pair).
///
/// Unit of circuit-breaking, caching, and sequence tracking.
pub type RequestKey = String;

/// Which fallback tier produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Live response from the primary provider.
    Primary,
    /// Live response from the secondary provider, translated.
    Secondary,
    /// Last-known-good cache entry.
    Cache,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
            Self::Cache => write!(f, "cache"),
        }
    }
}

/// Result of validating a payload against its domain invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityVerdict {
    /// Whether the payload passed every invariant.
    pub is_valid: bool,
    /// One message per violated invariant.
    pub errors: Vec<String>,
}

impl QualityVerdict {
    /// A verdict with no violations.
    #[must_use]
    pub const fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    /// A verdict from a list of violations; valid when the list is empty.
    #[must_use]
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// A payload plus the provenance and quality metadata consumers rely on.
#[derive(Debug, Clone, Serialize)]
pub struct Fetched<T> {
    /// The validated payload.
    pub data: T,
    /// Verdict produced for this payload.
    pub quality: QualityVerdict,
    /// Tier that produced the payload.
    pub source: DataSource,
}

// =============================================================================
// Records
// =============================================================================

/// A top-of-book quote for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Stream key this quote belongs to.
    pub key: RequestKey,
    /// Best bid price.
    pub bid: Decimal,
    /// Best ask price.
    pub ask: Decimal,
    /// Last traded price.
    pub last: Decimal,
    /// Exchange timestamp.
    pub timestamp: DateTime<Utc>,
}

/// One OHLCV candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Traded volume over the candle period.
    pub volume: Decimal,
    /// Candle open time.
    pub timestamp: DateTime<Utc>,
}

/// A single price level on one side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Resting quantity at this price.
    pub size: Decimal,
}

/// A full top-N order book snapshot for one key.
///
/// Replaced wholesale on every push update; the feed delivers complete
/// snapshots, not diffs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Stream key this book belongs to.
    pub key: RequestKey,
    /// Bid levels, price descending.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, price ascending.
    pub asks: Vec<PriceLevel>,
    /// Timestamp assigned by the exchange.
    pub exchange_time: DateTime<Utc>,
    /// Timestamp this process ingested the snapshot.
    pub ingest_time: DateTime<Utc>,
}

impl OrderBookSnapshot {
    /// Best (highest) bid level, if any.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Best (lowest) ask level, if any.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Age of the snapshot relative to `now`, measured from ingest time.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.ingest_time
    }
}

/// A spot exchange rate between two currencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    /// Base currency code.
    pub base: String,
    /// Quote currency code.
    pub quote: String,
    /// Units of quote currency per unit of base.
    pub rate: Decimal,
    /// Rate timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Candle period granularity for historical requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandlePeriod {
    /// One-minute candles.
    M1,
    /// Five-minute candles.
    M5,
    /// Fifteen-minute candles.
    M15,
    /// One-hour candles.
    H1,
    /// Four-hour candles.
    H4,
    /// Daily candles.
    D1,
}

impl CandlePeriod {
    /// Wire name used by provider APIs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Period length.
    #[must_use]
    pub fn duration(self) -> chrono::Duration {
        match self {
            Self::M1 => chrono::Duration::minutes(1),
            Self::M5 => chrono::Duration::minutes(5),
            Self::M15 => chrono::Duration::minutes(15),
            Self::H1 => chrono::Duration::hours(1),
            Self::H4 => chrono::Duration::hours(4),
            Self::D1 => chrono::Duration::days(1),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
