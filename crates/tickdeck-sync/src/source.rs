/*
[INPUT]:  Exchange REST client and stream base URL
[OUTPUT]: MarketDataSource strategy (single-attempt fetch + stream endpoints) and registry
[POS]:    Source layer - pluggable exchange backends behind the sync services
[UPDATE]: When adding exchanges or changing stream endpoint formats
*/

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use tickdeck_adapter::{
    Candle, ClientConfig, DEFAULT_REST_BASE_URL, DEFAULT_WS_BASE_URL, KlineInterval, RestClient,
};

use crate::error::{Result, SyncError};

pub const BINANCE_SOURCE_ID: &str = "binance";

/// Exchange backend used by the market data client.
///
/// `fetch_klines` performs exactly one attempt; retry lives in the client.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn id(&self) -> &str;

    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: KlineInterval,
        limit: u32,
    ) -> tickdeck_adapter::Result<Vec<Candle>>;

    fn kline_stream_url(&self, symbol: &str, interval: KlineInterval) -> String;

    fn depth_stream_url(&self, symbol: &str) -> String;

    fn trade_stream_url(&self, symbol: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct BinanceSource {
    rest: RestClient,
    ws_base: String,
}

impl BinanceSource {
    pub fn new() -> Result<Self> {
        Self::with_endpoints(DEFAULT_REST_BASE_URL, DEFAULT_WS_BASE_URL)
    }

    pub fn with_endpoints(rest_base: &str, ws_base: &str) -> Result<Self> {
        let rest = RestClient::with_config_and_base_url(ClientConfig::default(), rest_base)?;
        Ok(Self::with_client(rest, ws_base))
    }

    pub fn with_client(rest: RestClient, ws_base: &str) -> Self {
        Self {
            rest,
            ws_base: ws_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn ws_base(&self) -> &str {
        &self.ws_base
    }

    fn stream_url(&self, stream: &str) -> String {
        format!("{}/{}", self.ws_base, stream)
    }
}

fn stream_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_lowercase()
}

#[async_trait]
impl MarketDataSource for BinanceSource {
    fn id(&self) -> &str {
        BINANCE_SOURCE_ID
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: KlineInterval,
        limit: u32,
    ) -> tickdeck_adapter::Result<Vec<Candle>> {
        self.rest.get_klines(symbol, interval, limit).await
    }

    fn kline_stream_url(&self, symbol: &str, interval: KlineInterval) -> String {
        self.stream_url(&format!("{}@kline_{}", stream_symbol(symbol), interval))
    }

    fn depth_stream_url(&self, symbol: &str) -> String {
        self.stream_url(&format!("{}@depth@100ms", stream_symbol(symbol)))
    }

    fn trade_stream_url(&self, symbol: &str) -> String {
        self.stream_url(&format!("{}@trade", stream_symbol(symbol)))
    }
}

/// Sources by case-insensitive id
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn MarketDataSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
        }
    }

    /// Registry holding the Binance source for the given endpoints
    pub fn with_defaults(rest_base: &str, ws_base: &str) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(BinanceSource::with_endpoints(rest_base, ws_base)?));
        Ok(registry)
    }

    pub fn register(&mut self, source: Arc<dyn MarketDataSource>) {
        self.sources.insert(source.id().to_ascii_lowercase(), source);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn MarketDataSource>> {
        self.sources.get(&id.trim().to_ascii_lowercase()).cloned()
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<dyn MarketDataSource>> {
        self.get(id)
            .ok_or_else(|| SyncError::UnknownSource(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.keys().cloned().collect();
        ids.sort();
        ids
    }
}
