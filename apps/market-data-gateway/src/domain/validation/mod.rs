//! Payload Quality Validation
//!
//! Stateless invariant checks over canonical records. A payload failing any
//! invariant is reported with one message per violation; callers treat an
//! invalid payload the same as a fetch failure and move to the next tier.
//!
//! Validation runs on every payload, fresh, regardless of which provider
//! produced it — translation tolerance lives at the provider boundary, not
//! here.

use rust_decimal::Decimal;

use super::market::{Candle, ExchangeRate, OrderBookSnapshot, QualityVerdict, Quote};

/// A payload type that can be checked against its domain invariants.
pub trait Validate {
    /// Check every invariant, collecting one message per violation.
    fn validate(&self) -> QualityVerdict;
}

impl Validate for Quote {
    fn validate(&self) -> QualityVerdict {
        let mut errors = Vec::new();

        if self.bid <= Decimal::ZERO {
            errors.push(format!("bid must be positive, got {}", self.bid));
        }
        if self.ask <= Decimal::ZERO {
            errors.push(format!("ask must be positive, got {}", self.ask));
        }
        if self.last <= Decimal::ZERO {
            errors.push(format!("last price must be positive, got {}", self.last));
        }
        if self.bid > self.ask {
            errors.push(format!("bid {} exceeds ask {}", self.bid, self.ask));
        }

        QualityVerdict::from_errors(errors)
    }
}

impl Validate for Candle {
    fn validate(&self) -> QualityVerdict {
        let mut errors = Vec::new();

        if self.open <= Decimal::ZERO {
            errors.push(format!("open must be positive, got {}", self.open));
        }
        if self.close <= Decimal::ZERO {
            errors.push(format!("close must be positive, got {}", self.close));
        }
        if self.high < self.low {
            errors.push(format!("high {} below low {}", self.high, self.low));
        }
        if self.volume < Decimal::ZERO {
            errors.push(format!("volume must be non-negative, got {}", self.volume));
        }

        QualityVerdict::from_errors(errors)
    }
}

impl Validate for Vec<Candle> {
    fn validate(&self) -> QualityVerdict {
        if self.is_empty() {
            return QualityVerdict::from_errors(vec!["candle array is empty".to_string()]);
        }

        let mut errors = Vec::new();
        for (index, candle) in self.iter().enumerate() {
            let verdict = candle.validate();
            for error in verdict.errors {
                errors.push(format!("candle[{index}]: {error}"));
            }
        }

        QualityVerdict::from_errors(errors)
    }
}

impl Validate for OrderBookSnapshot {
    fn validate(&self) -> QualityVerdict {
        let mut errors = Vec::new();

        if self.bids.is_empty() {
            errors.push("bid side is empty".to_string());
        }
        if self.asks.is_empty() {
            errors.push("ask side is empty".to_string());
        }

        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid.price > ask.price {
                errors.push(format!(
                    "best bid {} exceeds best ask {}",
                    bid.price, ask.price
                ));
            }
        }

        for level in self.bids.iter().chain(self.asks.iter()) {
            if level.price <= Decimal::ZERO {
                errors.push(format!("level price must be positive, got {}", level.price));
                break;
            }
        }

        QualityVerdict::from_errors(errors)
    }
}

impl Validate for ExchangeRate {
    fn validate(&self) -> QualityVerdict {
        let mut errors = Vec::new();

        if self.rate <= Decimal::ZERO {
            errors.push(format!("rate must be positive, got {}", self.rate));
        }
        if self.base.is_empty() || self.quote.is_empty() {
            errors.push("currency codes must be non-empty".to_string());
        }

        QualityVerdict::from_errors(errors)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use test_case::test_case;

    use crate::domain::market::PriceLevel;

    fn valid_quote() -> Quote {
        Quote {
            key: "BTC-USD".to_string(),
            bid: Decimal::new(99_995, 1),
            ask: Decimal::new(100_005, 1),
            last: Decimal::from(10_000),
            timestamp: Utc::now(),
        }
    }

    fn valid_candle() -> Candle {
        Candle {
            open: Decimal::from(100),
            high: Decimal::from(110),
            low: Decimal::from(95),
            close: Decimal::from(105),
            volume: Decimal::from(1_000),
            timestamp: Utc::now(),
        }
    }

    fn valid_book() -> OrderBookSnapshot {
        OrderBookSnapshot {
            key: "BTC-USD".to_string(),
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
        }
    }

    #[test]
    fn valid_quote_passes() {
        assert!(valid_quote().validate().is_valid);
    }

    #[test]
    fn crossed_quote_fails() {
        let mut quote = valid_quote();
        quote.bid = quote.ask + Decimal::ONE;

        let verdict = quote.validate();
        assert!(!verdict.is_valid);
        assert!(verdict.errors.iter().any(|e| e.contains("exceeds ask")));
    }

    #[test]
    fn non_positive_last_fails() {
        let mut quote = valid_quote();
        quote.last = Decimal::ZERO;
        assert!(!quote.validate().is_valid);
    }

    #[test]
    fn valid_candles_pass() {
        let candles = vec![valid_candle(), valid_candle()];
        assert!(candles.validate().is_valid);
    }

    #[test]
    fn empty_candle_array_fails() {
        let candles: Vec<Candle> = vec![];
        let verdict = candles.validate();
        assert!(!verdict.is_valid);
        assert!(verdict.errors[0].contains("empty"));
    }

    #[test]
    fn high_below_low_fails() {
        let mut candle = valid_candle();
        candle.high = candle.low - Decimal::ONE;

        let verdict = vec![candle].validate();
        assert!(!verdict.is_valid);
        assert!(verdict.errors[0].contains("candle[0]"));
    }

    #[test]
    fn negative_volume_fails() {
        let mut candle = valid_candle();
        candle.volume = Decimal::from(-1);
        assert!(!candle.validate().is_valid);
    }

    #[test_case(110, 95 => true ; "high above low is valid")]
    #[test_case(100, 100 => true ; "flat candle is valid")]
    #[test_case(95, 110 => false ; "high below low is invalid")]
    fn candle_extremes(high: i64, low: i64) -> bool {
        let mut candle = valid_candle();
        candle.high = Decimal::from(high);
        candle.low = Decimal::from(low);
        candle.validate().is_valid
    }

    #[test]
    fn valid_book_passes() {
        assert!(valid_book().validate().is_valid);
    }

    #[test]
    fn one_sided_book_fails() {
        let mut book = valid_book();
        book.asks.clear();

        let verdict = book.validate();
        assert!(!verdict.is_valid);
        assert!(verdict.errors.iter().any(|e| e.contains("ask side")));
    }

    #[test]
    fn crossed_book_fails() {
        let mut book = valid_book();
        book.bids[0].price = Decimal::from(200);

        let verdict = book.validate();
        assert!(!verdict.is_valid);
        assert!(verdict.errors.iter().any(|e| e.contains("best bid")));
    }

    #[test]
    fn exchange_rate_checks() {
        let rate = ExchangeRate {
            base: "BTC".to_string(),
            quote: "USD".to_string(),
            rate: Decimal::from(10_000),
            timestamp: Utc::now(),
        };
        assert!(rate.validate().is_valid);

        let zero = ExchangeRate {
            rate: Decimal::ZERO,
            ..rate
        };
        assert!(!zero.validate().is_valid);
    }

    #[test]
    fn violations_accumulate() {
        let quote = Quote {
            key: "X".to_string(),
            bid: Decimal::ZERO,
            ask: Decimal::from(-1),
            last: Decimal::ZERO,
            timestamp: Utc::now(),
        };

        let verdict = quote.validate();
        assert!(!verdict.is_valid);
        assert!(verdict.errors.len() >= 3);
    }
}
