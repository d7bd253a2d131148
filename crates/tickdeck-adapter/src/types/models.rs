/*
[INPUT]:  Raw REST kline rows and decoded stream payloads
[OUTPUT]: Normalized Candle / OrderBookLevel / DepthUpdate / Trade values
[POS]:    Data layer - domain models admitted after validation
[UPDATE]: When payload schemas change or normalization rules change
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::TakerSide;
use crate::decimal::{decimal_from_value, i64_from_value, millis_to_seconds};
use crate::http::{AdapterError, Result};

/// Fixed-interval OHLC summary. `open_time` is in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
}

impl Candle {
    /// Normalize one REST kline row: `[openTimeMs, open, high, low, close, ...]`.
    ///
    /// Only the first five fields are read; the rest of the row is ignored.
    pub fn from_rest_row(row: &Value) -> Result<Self> {
        let fields = row
            .as_array()
            .ok_or_else(|| AdapterError::InvalidFormat(format!("kline row is not an array: {row}")))?;
        if fields.len() < 5 {
            return Err(AdapterError::InvalidFormat(format!(
                "kline row has {} fields, expected at least 5",
                fields.len()
            )));
        }

        Self::from_fields(&fields[0], &fields[1], &fields[2], &fields[3], &fields[4])
    }

    /// Normalize raw open-time (ms) and OHLC values.
    pub fn from_fields(
        open_time_ms: &Value,
        open: &Value,
        high: &Value,
        low: &Value,
        close: &Value,
    ) -> Result<Self> {
        Ok(Self {
            open_time: millis_to_seconds(i64_from_value("open_time", open_time_ms)?),
            open: decimal_from_value("open", open)?,
            high: decimal_from_value("high", high)?,
            low: decimal_from_value("low", low)?,
            close: decimal_from_value("close", close)?,
        })
    }
}

/// Sort ascending by open time and keep the last candle for each timestamp.
pub fn normalize_candles(mut candles: Vec<Candle>) -> Vec<Candle> {
    // stable sort keeps arrival order among equal timestamps
    candles.sort_by_key(|candle| candle.open_time);

    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match out.last_mut() {
            Some(last) if last.open_time == candle.open_time => *last = candle,
            _ => out.push(candle),
        }
    }
    out
}

/// A (price, aggregate quantity) pair on one side of the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
}

impl OrderBookLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    pub fn from_pair(price: &Value, quantity: &Value) -> Result<Self> {
        Ok(Self {
            price: decimal_from_value("price", price)?,
            quantity: decimal_from_value("quantity", quantity)?,
        })
    }

    /// Zero quantity in an update means "remove this level"
    pub fn is_removal(&self) -> bool {
        self.quantity.is_zero()
    }
}

/// One validated batch of incremental depth changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthUpdate {
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

impl DepthUpdate {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    /// Trade time in milliseconds
    pub event_time: i64,
    pub taker_side: TakerSide,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candle_from_rest_row_reads_first_five_fields() {
        let row = json!([
            1_700_000_060_123_i64,
            "100.0",
            "100.8",
            "99.9",
            "100.5",
            "12.3",
            1_700_000_119_999_i64
        ]);
        let candle = Candle::from_rest_row(&row).unwrap();

        assert_eq!(candle.open_time, 1_700_000_060);
        assert_eq!(candle.open, "100.0".parse::<Decimal>().unwrap());
        assert_eq!(candle.high, "100.8".parse::<Decimal>().unwrap());
        assert_eq!(candle.low, "99.9".parse::<Decimal>().unwrap());
        assert_eq!(candle.close, "100.5".parse::<Decimal>().unwrap());
    }

    #[test]
    fn candle_rejects_unparsable_fields() {
        let row = json!([1_700_000_060_000_i64, "100", "NaN", "99", "100"]);
        let err = Candle::from_rest_row(&row).unwrap_err();
        assert!(matches!(err, AdapterError::Parse { ref field, .. } if field == "high"));

        let short = json!([1_700_000_060_000_i64, "100"]);
        assert!(matches!(
            Candle::from_rest_row(&short),
            Err(AdapterError::InvalidFormat(_))
        ));
    }

    #[test]
    fn normalize_sorts_and_dedups_by_open_time() {
        let candle = |t: i64, close: i64| Candle {
            open_time: t,
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::from(close),
        };
        let out = normalize_candles(vec![candle(120, 1), candle(60, 2), candle(120, 3)]);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].open_time, 60);
        assert_eq!(out[1].open_time, 120);
        assert_eq!(out[1].close, Decimal::from(3));
    }

    #[test]
    fn zero_quantity_level_is_removal() {
        let level = OrderBookLevel::from_pair(&json!("100.1"), &json!("0.000")).unwrap();
        assert!(level.is_removal());
        let level = OrderBookLevel::from_pair(&json!("100.1"), &json!("0.5")).unwrap();
        assert!(!level.is_removal());
    }

    #[test]
    fn trade_serializes_decimals_as_strings() {
        let trade = Trade {
            id: 7,
            price: Decimal::new(6500012, 2),
            quantity: Decimal::new(15, 3),
            event_time: 1_700_000_000_000,
            taker_side: TakerSide::Buy,
        };
        let value = serde_json::to_value(trade).unwrap();
        assert_eq!(value["price"], json!("65000.12"));
        assert_eq!(value["taker_side"], json!("buy"));
    }
}
