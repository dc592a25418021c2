use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Interval, ProviderId, Symbol, UtcDateTime, ValidationError};

/// One validated OHLCV bar.
///
/// Identity is (symbol, interval, open_time); the store enforces that triple as
/// its primary key, so constructing the same candle twice upserts rather than
/// duplicates. All price/volume invariants are checked here, before anything
/// reaches storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: Symbol,
    pub interval: Interval,
    pub open_time: UtcDateTime,
    pub close_time: UtcDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: Option<f64>,
    pub trade_count: Option<u64>,
    pub source: ProviderId,
    /// Raw provider row kept for debugging; never interpreted past the adapter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<String>,
}

impl Candle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        interval: Interval,
        open_time: UtcDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        quote_volume: Option<f64>,
        trade_count: Option<u64>,
        source: ProviderId,
        raw_payload: Option<String>,
    ) -> Result<Self, ValidationError> {
        validate_positive("open", open)?;
        validate_positive("high", high)?;
        validate_positive("low", low)?;
        validate_positive("close", close)?;
        validate_non_negative("volume", volume)?;
        if let Some(quote_volume) = quote_volume {
            validate_non_negative("quote_volume", quote_volume)?;
        }

        if high < low {
            return Err(ValidationError::InvalidCandleRange);
        }
        if open < low || open > high || close < low || close > high {
            return Err(ValidationError::InvalidCandleBounds);
        }

        // Close one tick before the next bucket opens.
        let close_time = open_time
            .checked_add(interval.duration() - Duration::from_secs(1))
            .ok_or(ValidationError::InvalidCandleTimes)?;
        if close_time <= open_time {
            return Err(ValidationError::InvalidCandleTimes);
        }

        Ok(Self {
            symbol,
            interval,
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
            quote_volume,
            trade_count,
            source,
            raw_payload,
        })
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn price_change(&self) -> f64 {
        self.close - self.open
    }
}

fn validate_positive(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value <= 0.0 {
        return Err(ValidationError::NonPositiveValue { field });
    }
    Ok(())
}

fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Result<Candle, ValidationError> {
        Candle::new(
            Symbol::parse("BTCUSDT").expect("symbol"),
            Interval::OneHour,
            UtcDateTime::parse("2024-01-01T00:00:00Z").expect("timestamp"),
            open,
            high,
            low,
            close,
            1_000.0,
            None,
            None,
            ProviderId::Bybit,
            None,
        )
    }

    #[test]
    fn derives_close_time_from_interval() {
        let candle = candle(100.0, 105.0, 99.0, 103.0).expect("valid candle");
        assert_eq!(candle.close_time.format_rfc3339(), "2024-01-01T00:59:59Z");
    }

    #[test]
    fn rejects_high_below_low() {
        let err = candle(100.0, 98.0, 99.0, 98.5).expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidCandleRange));
    }

    #[test]
    fn rejects_close_outside_range() {
        let err = candle(100.0, 105.0, 99.0, 106.0).expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidCandleBounds));
    }

    #[test]
    fn rejects_non_positive_price() {
        let err = candle(0.0, 105.0, 99.0, 103.0).expect_err("must fail");
        assert!(matches!(err, ValidationError::NonPositiveValue { .. }));
    }
}
