//! Port Definitions
//!
//! Interfaces the gateway consumes but does not implement: the primary and
//! secondary request/response providers and the push-stream transport.
//! Infrastructure adapters implement these; tests substitute mocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::market::{Candle, CandlePeriod, ExchangeRate, OrderBookSnapshot, Quote};

// =============================================================================
// Provider Errors
// =============================================================================

/// Errors from an upstream provider call.
///
/// The retry/breaker split follows the taxonomy this layer is built around:
/// transient transport failures are retried with backoff and never open the
/// breaker; client rejections abort retries and count toward the per-key
/// breaker; decode failures are treated as data-shape problems and neither
/// retried nor counted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Network-level failure (reset, refused, DNS).
    #[error("network error: {0}")]
    Network(String),

    /// The call exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// Upstream returned a non-success HTTP status.
    #[error("upstream status {code}: {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body or status text.
        message: String,
    },

    /// Response body could not be decoded into the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// The provider is not configured or has been disabled.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Whether the failure is transient and worth retrying with backoff.
    ///
    /// 408 and 429 are 4xx on the wire but transient in nature; they retry
    /// rather than feeding the breaker.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Status { code, .. } => {
                *code >= 500 || *code == 408 || *code == 429
            }
            Self::Decode(_) | Self::Unavailable(_) => false,
        }
    }

    /// Whether the failure is a client rejection that should count toward
    /// the per-key circuit breaker.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        match self {
            Self::Status { code, .. } => {
                *code >= 400 && *code < 500 && *code != 408 && *code != 429
            }
            _ => false,
        }
    }
}

// =============================================================================
// Request/Response Provider Port
// =============================================================================

/// A request/response market data provider.
///
/// Both the primary and the secondary provider implement this port; the
/// secondary's adapter translates its native wire shape into the canonical
/// records before returning, so callers never see provider-specific shapes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name for logging and health tracking.
    fn name(&self) -> &str;

    /// Fetch the current top-of-book quote for a key.
    async fn quote(&self, key: &str) -> Result<Quote, ProviderError>;

    /// Fetch historical candles for a key.
    ///
    /// `limit` bounds the row count of a single upstream call; range
    /// segmentation above that bound is the caller's concern.
    async fn candles(
        &self,
        key: &str,
        period: CandlePeriod,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Candle>, ProviderError>;

    /// Fetch a point-in-time order book snapshot for a key.
    async fn order_book(&self, key: &str, depth: u32) -> Result<OrderBookSnapshot, ProviderError>;

    /// Fetch a spot exchange rate.
    async fn exchange_rate(&self, base: &str, quote: &str)
    -> Result<ExchangeRate, ProviderError>;
}

// =============================================================================
// Stream Transport Port
// =============================================================================

/// An event surfaced by a live stream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame from the upstream feed.
    Message(String),
    /// A pong in response to our ping.
    Pong,
    /// The server closed the connection.
    Closed,
}

/// One live connection to the push feed.
#[async_trait]
pub trait StreamConnection: Send {
    /// Send a text frame upstream (subscribe/unsubscribe requests).
    async fn send_text(&mut self, payload: String) -> Result<(), ProviderError>;

    /// Send a keepalive ping.
    async fn send_ping(&mut self) -> Result<(), ProviderError>;

    /// Wait for the next event. `None` means the stream ended.
    async fn next_event(&mut self) -> Option<Result<TransportEvent, ProviderError>>;

    /// Close the connection. Safe to call more than once.
    async fn close(&mut self);
}

/// Factory for stream connections.
///
/// The ingestion client owns reconnection; the transport only knows how to
/// produce one fresh connection per call.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Establish a new connection to the push feed.
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, ProviderError>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_retryable() {
        assert!(ProviderError::Network("connection reset".to_string()).is_retryable());
        assert!(ProviderError::Timeout.is_retryable());
    }

    #[test]
    fn server_errors_are_retryable() {
        for code in [500, 502, 503, 504] {
            let err = ProviderError::Status {
                code,
                message: String::new(),
            };
            assert!(err.is_retryable(), "{code} should be retryable");
            assert!(!err.is_rejection());
        }
    }

    #[test]
    fn rate_limit_and_timeout_statuses_retry_without_rejection() {
        for code in [408, 429] {
            let err = ProviderError::Status {
                code,
                message: String::new(),
            };
            assert!(err.is_retryable());
            assert!(!err.is_rejection());
        }
    }

    #[test]
    fn client_errors_are_rejections() {
        for code in [400, 401, 403, 404, 422] {
            let err = ProviderError::Status {
                code,
                message: String::new(),
            };
            assert!(err.is_rejection(), "{code} should be a rejection");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn decode_errors_neither_retry_nor_reject() {
        let err = ProviderError::Decode("missing field".to_string());
        assert!(!err.is_retryable());
        assert!(!err.is_rejection());
    }
}
