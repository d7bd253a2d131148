/*
[INPUT]:  Parsed JSON values from stream frames
[OUTPUT]: Tagged StreamEvent variants and normalized domain values
[POS]:    WebSocket layer - message shape validation and decoding
[UPDATE]: When adding new stream types or changing payload format
*/

use serde::Deserialize;
use serde_json::Value;

use crate::decimal::{decimal_from_value, i64_from_value};
use crate::http::{AdapterError, Result};
use crate::types::{Candle, DepthUpdate, OrderBookLevel, TakerSide, Trade};

/// Kline stream envelope: `{"k": {"t", "o", "h", "l", "c", ...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct KlineEnvelope {
    pub k: KlineData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KlineData {
    pub t: Value,
    pub o: Value,
    pub h: Value,
    pub l: Value,
    pub c: Value,
    /// Whether this candle is closed
    #[serde(default)]
    pub x: Option<bool>,
}

/// Depth stream payload: `{"b": [[price, qty], ...], "a": [[price, qty], ...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct DepthData {
    pub b: Vec<(Value, Value)>,
    pub a: Vec<(Value, Value)>,
}

/// Trade stream payload: `{"t", "p", "q", "T", "m"}`
#[derive(Debug, Clone, Deserialize)]
pub struct TradeData {
    pub t: u64,
    pub p: Value,
    pub q: Value,
    #[serde(rename = "T")]
    pub trade_time: Value,
    pub m: bool,
}

/// Every stream payload shape the dashboard consumes.
///
/// Shapes are distinguished by their required fields, so a payload missing any
/// of them fails to decode instead of producing a half-filled value.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Kline(KlineEnvelope),
    Depth(DepthData),
    Trade(TradeData),
}

impl StreamEvent {
    pub fn decode(value: &Value) -> Result<Self> {
        StreamEvent::deserialize(value)
            .map_err(|_| AdapterError::Decode(format!("unrecognized stream payload: {}", preview(value))))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Kline(_) => "kline",
            StreamEvent::Depth(_) => "depth",
            StreamEvent::Trade(_) => "trade",
        }
    }
}

impl KlineData {
    pub fn to_candle(&self) -> Result<Candle> {
        Candle::from_fields(&self.t, &self.o, &self.h, &self.l, &self.c)
    }
}

impl DepthData {
    /// Validate every pair before producing the batch, so a bad pair rejects
    /// the whole update.
    pub fn to_update(&self) -> Result<DepthUpdate> {
        let side = |pairs: &[(Value, Value)]| {
            pairs
                .iter()
                .map(|(price, quantity)| OrderBookLevel::from_pair(price, quantity))
                .collect::<Result<Vec<_>>>()
        };

        Ok(DepthUpdate {
            bids: side(&self.b)?,
            asks: side(&self.a)?,
        })
    }
}

impl TradeData {
    pub fn to_trade(&self) -> Result<Trade> {
        Ok(Trade {
            id: self.t,
            price: decimal_from_value("price", &self.p)?,
            quantity: decimal_from_value("quantity", &self.q)?,
            event_time: i64_from_value("trade_time", &self.trade_time)?,
            taker_side: TakerSide::from_buyer_maker(self.m),
        })
    }
}

/// Decode a kline stream message into a normalized candle.
pub fn decode_kline(value: &Value) -> Result<Candle> {
    match StreamEvent::decode(value)? {
        StreamEvent::Kline(envelope) => envelope.k.to_candle(),
        other => Err(unexpected("kline", &other)),
    }
}

/// Decode a depth stream message into a validated batch.
pub fn decode_depth(value: &Value) -> Result<DepthUpdate> {
    match StreamEvent::decode(value)? {
        StreamEvent::Depth(depth) => depth.to_update(),
        other => Err(unexpected("depth", &other)),
    }
}

/// Decode a trade stream message.
pub fn decode_trade(value: &Value) -> Result<Trade> {
    match StreamEvent::decode(value)? {
        StreamEvent::Trade(trade) => trade.to_trade(),
        other => Err(unexpected("trade", &other)),
    }
}

fn unexpected(expected: &str, got: &StreamEvent) -> AdapterError {
    AdapterError::Decode(format!("expected {expected} payload, got {}", got.kind()))
}

fn preview(value: &Value) -> String {
    crate::http::client::truncate_for_log(&value.to_string(), 256)
}
