/*
[INPUT]:  Symbol, interval and limit query parameters
[OUTPUT]: Normalized candle series from the public klines endpoint
[POS]:    HTTP layer - public market data endpoints (no auth required)
[UPDATE]: When adding new public endpoints or changing response format
*/

use crate::http::{AdapterError, RestClient, Result};
use crate::types::{normalize_candles, Candle, KlineInterval};

impl RestClient {
    /// Get kline/candlestick history. One attempt, no retry.
    ///
    /// GET /klines?symbol={SYMBOL}&interval={interval}&limit={limit}
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: KlineInterval,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let query = [
            ("symbol", symbol.trim().to_ascii_uppercase()),
            ("interval", interval.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        let body = self.get_json("klines", &query).await?;

        let rows = body.as_array().ok_or_else(|| {
            AdapterError::InvalidFormat(format!(
                "klines response is not an array (got {})",
                json_kind(&body)
            ))
        })?;

        let candles = rows
            .iter()
            .map(Candle::from_rest_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(normalize_candles(candles))
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
