/*
[INPUT]:  SyncConfig, optional socket connector override
[OUTPUT]: Process-wide shared services and per-market live views
[POS]:    Composition root - owns connection manager, cache and client lifetimes
[UPDATE]: When adding services or changing how markets are started
*/

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use tickdeck_adapter::KlineInterval;

use crate::cache::HistoricalCache;
use crate::client::{
    CandleCache, MarketDataClient, depth_stream_key, kline_stream_key, trade_stream_key,
};
use crate::config::{MarketConfig, SyncConfig};
use crate::connection::{ConnectionManager, ConnectionState, SocketConnector, TungsteniteConnector};
use crate::error::Result;
use crate::feeds::{CandleFeed, OrderBookFeed, TradeTapeFeed};
use crate::source::{MarketDataSource, SourceRegistry};

/// Shared services built once per process.
#[derive(Debug)]
pub struct SyncServices {
    config: SyncConfig,
    connections: ConnectionManager,
    cache: Arc<CandleCache>,
    client: Arc<MarketDataClient>,
}

impl SyncServices {
    pub fn from_config(config: SyncConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(TungsteniteConnector))
    }

    pub fn with_connector(config: SyncConfig, connector: Arc<dyn SocketConnector>) -> Result<Self> {
        let registry = SourceRegistry::with_defaults(&config.rest_base, &config.ws_base)?;
        let source = registry.resolve(&config.source)?;
        Ok(Self::with_source(config, source, connector))
    }

    pub fn with_source(
        config: SyncConfig,
        source: Arc<dyn MarketDataSource>,
        connector: Arc<dyn SocketConnector>,
    ) -> Self {
        let connections = ConnectionManager::with_connector(connector, config.reconnect_policy());
        let cache: Arc<CandleCache> = Arc::new(HistoricalCache::new(
            config.history.cache_capacity,
            config.cache_expiry(),
        ));
        let client = Arc::new(MarketDataClient::new(
            source,
            connections.clone(),
            cache.clone(),
            config.client_options(),
        ));

        info!(source = client.source().id(), markets = config.markets.len(), "sync services ready");
        Self {
            config,
            connections,
            cache,
            client,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn cache(&self) -> &Arc<CandleCache> {
        &self.cache
    }

    pub fn client(&self) -> &Arc<MarketDataClient> {
        &self.client
    }

    /// Load history and open the live candle, depth and trade feeds.
    pub async fn start_market(&self, market: &MarketConfig) -> Result<MarketView> {
        let live = &self.config.live;
        let candles = CandleFeed::start(
            &self.client,
            &market.symbol,
            market.interval,
            market.limit,
            live.candle_capacity,
        )
        .await?;
        let book = OrderBookFeed::start(self.client.clone(), &market.symbol, live.book_depth);
        let trades = TradeTapeFeed::start(&self.client, &market.symbol, live.trade_capacity);

        info!(symbol = %market.symbol, interval = %market.interval, "market view started");
        Ok(MarketView {
            symbol: market.symbol.clone(),
            interval: market.interval,
            connections: self.connections.clone(),
            candles,
            book,
            trades,
        })
    }

    /// Tear down: drop this client's cache entries and close every stream.
    pub fn shutdown(&self) {
        self.client.destroy();
        self.connections.destroy();
        info!("sync services shut down");
    }
}

/// Live views of one market.
#[derive(Debug)]
pub struct MarketView {
    symbol: String,
    interval: KlineInterval,
    connections: ConnectionManager,
    pub candles: CandleFeed,
    pub book: OrderBookFeed,
    pub trades: TradeTapeFeed,
}

/// Point-in-time digest of a market view, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketSummary {
    pub symbol: String,
    pub candles: usize,
    pub last_close: Option<Decimal>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub trades: usize,
    pub last_trade: Option<Decimal>,
    pub kline_state: Option<ConnectionState>,
    pub depth_state: Option<ConnectionState>,
    pub trade_state: Option<ConnectionState>,
}

impl MarketView {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn summary(&self) -> MarketSummary {
        let candles = self.candles.latest();
        let book = self.book.latest();
        let trades = self.trades.latest();

        MarketSummary {
            symbol: self.symbol.clone(),
            candles: candles.len(),
            last_close: candles.last().map(|candle| candle.close),
            best_bid: book.best_bid().map(|level| level.price),
            best_ask: book.best_ask().map(|level| level.price),
            spread: book.spread(),
            trades: trades.len(),
            last_trade: trades.first().map(|trade| trade.price),
            kline_state: self
                .connections
                .state(&kline_stream_key(&self.symbol, self.interval)),
            depth_state: self.connections.state(&depth_stream_key(&self.symbol)),
            trade_state: self.connections.state(&trade_stream_key(&self.symbol)),
        }
    }
}
