//! Push Feed Codec
//!
//! Decodes the primary provider's push frames into typed messages and
//! encodes subscription requests. This is the only place the feed's wire
//! shape is known; everything downstream sees canonical records.
//!
//! # Wire Format
//!
//! Frames are JSON objects tagged by `type`:
//!
//! ```json
//! {"type":"book","key":"BTC-USD","seq":42,"ts":1700000000123,
//!  "bids":[["100.5","1.2"]],"asks":[["100.6","0.8"]]}
//! {"type":"subscribed","keys":["BTC-USD"]}
//! {"type":"heartbeat"}
//! {"type":"error","code":400,"msg":"unknown key"}
//! ```

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::market::{OrderBookSnapshot, PriceLevel};

// =============================================================================
// Errors
// =============================================================================

/// Errors from frame decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame was not valid JSON or did not match any known shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

// =============================================================================
// Inbound Frames
// =============================================================================

/// A full top-N book snapshot pushed by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookFrame {
    /// Stream key.
    pub key: String,
    /// Per-key sequence number, strictly `+1` on a healthy stream.
    pub seq: u64,
    /// Exchange timestamp, milliseconds since epoch.
    pub ts: i64,
    /// Bid levels as `[price, size]` pairs.
    pub bids: Vec<(Decimal, Decimal)>,
    /// Ask levels as `[price, size]` pairs.
    pub asks: Vec<(Decimal, Decimal)>,
}

impl BookFrame {
    /// Convert into a canonical snapshot, normalizing level order.
    ///
    /// Bids sort price-descending and asks price-ascending regardless of
    /// feed order.
    #[must_use]
    pub fn into_snapshot(self, ingest_time: DateTime<Utc>) -> OrderBookSnapshot {
        let exchange_time = Utc
            .timestamp_millis_opt(self.ts)
            .single()
            .unwrap_or(ingest_time);

        let mut bids: Vec<PriceLevel> = self
            .bids
            .into_iter()
            .map(|(price, size)| PriceLevel { price, size })
            .collect();
        let mut asks: Vec<PriceLevel> = self
            .asks
            .into_iter()
            .map(|(price, size)| PriceLevel { price, size })
            .collect();

        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        OrderBookSnapshot {
            key: self.key,
            bids,
            asks,
            exchange_time,
            ingest_time,
        }
    }
}

/// One decoded frame from the push feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedFrame {
    /// A book snapshot update.
    Book(BookFrame),
    /// Subscription acknowledgement.
    Subscribed {
        /// Keys now active on the connection.
        keys: Vec<String>,
    },
    /// Unsubscription acknowledgement.
    Unsubscribed {
        /// Keys removed from the connection.
        keys: Vec<String>,
    },
    /// Server keepalive.
    Heartbeat,
    /// Server-reported error.
    Error {
        /// Upstream error code.
        code: u16,
        /// Upstream error message.
        msg: String,
    },
}

// =============================================================================
// Outbound Frames
// =============================================================================

/// A subscribe/unsubscribe request sent to the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// `"subscribe"` or `"unsubscribe"`.
    pub action: String,
    /// Keys to change.
    pub keys: Vec<String>,
}

impl SubscriptionRequest {
    /// Build a subscribe request.
    #[must_use]
    pub fn subscribe(keys: Vec<String>) -> Self {
        Self {
            action: "subscribe".to_string(),
            keys,
        }
    }

    /// Build an unsubscribe request.
    #[must_use]
    pub fn unsubscribe(keys: Vec<String>) -> Self {
        Self {
            action: "unsubscribe".to_string(),
            keys,
        }
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Stateless frame codec for the push feed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedCodec;

impl FeedCodec {
    /// Create a codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one inbound text frame.
    pub fn decode(&self, text: &str) -> Result<FeedFrame, CodecError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode a subscription request for the wire.
    pub fn encode(&self, request: &SubscriptionRequest) -> Result<String, CodecError> {
        Ok(serde_json::to_string(request)?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_book_frame() {
        let codec = FeedCodec::new();
        let frame = codec
            .decode(
                r#"{"type":"book","key":"BTC-USD","seq":42,"ts":1700000000123,
                    "bids":[["100.5","1.2"],["100.4","2.0"]],
                    "asks":[["100.6","0.8"]]}"#,
            )
            .unwrap();

        let FeedFrame::Book(book) = frame else {
            panic!("expected book frame");
        };
        assert_eq!(book.key, "BTC-USD");
        assert_eq!(book.seq, 42);
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.asks.len(), 1);
    }

    #[test]
    fn decodes_control_frames() {
        let codec = FeedCodec::new();

        assert_eq!(
            codec
                .decode(r#"{"type":"subscribed","keys":["BTC-USD"]}"#)
                .unwrap(),
            FeedFrame::Subscribed {
                keys: vec!["BTC-USD".to_string()]
            }
        );
        assert_eq!(
            codec.decode(r#"{"type":"heartbeat"}"#).unwrap(),
            FeedFrame::Heartbeat
        );
    }

    #[test]
    fn decodes_error_frame() {
        let codec = FeedCodec::new();
        let frame = codec
            .decode(r#"{"type":"error","code":400,"msg":"unknown key"}"#)
            .unwrap();

        assert_eq!(
            frame,
            FeedFrame::Error {
                code: 400,
                msg: "unknown key".to_string()
            }
        );
    }

    #[test]
    fn rejects_malformed_frames() {
        let codec = FeedCodec::new();
        assert!(codec.decode("not json").is_err());
        assert!(codec.decode(r#"{"type":"mystery"}"#).is_err());
    }

    #[test]
    fn snapshot_normalizes_level_order() {
        let frame = BookFrame {
            key: "BTC-USD".to_string(),
            seq: 1,
            ts: 1_700_000_000_123,
            bids: vec![
                (Decimal::from(99), Decimal::ONE),
                (Decimal::from(100), Decimal::ONE),
            ],
            asks: vec![
                (Decimal::from(102), Decimal::ONE),
                (Decimal::from(101), Decimal::ONE),
            ],
        };

        let snapshot = frame.into_snapshot(Utc::now());
        assert_eq!(snapshot.best_bid().unwrap().price, Decimal::from(100));
        assert_eq!(snapshot.best_ask().unwrap().price, Decimal::from(101));
    }

    #[test]
    fn bad_timestamp_falls_back_to_ingest_time() {
        let ingest = Utc::now();
        let frame = BookFrame {
            key: "BTC-USD".to_string(),
            seq: 1,
            ts: i64::MAX,
            bids: vec![(Decimal::from(1), Decimal::ONE)],
            asks: vec![(Decimal::from(2), Decimal::ONE)],
        };

        let snapshot = frame.into_snapshot(ingest);
        assert_eq!(snapshot.exchange_time, ingest);
    }

    #[test]
    fn subscription_round_trip() {
        let codec = FeedCodec::new();
        let encoded = codec
            .encode(&SubscriptionRequest::subscribe(vec!["BTC-USD".to_string()]))
            .unwrap();

        assert!(encoded.contains("\"subscribe\""));
        assert!(encoded.contains("BTC-USD"));
    }
}
