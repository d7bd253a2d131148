/*
[INPUT]:  Public API exports for tickdeck-sync crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod feeds;
pub mod order_book;
pub mod reducers;
pub mod services;
pub mod source;

// Re-export main types for convenience
pub use cache::HistoricalCache;
pub use client::{CandleCache, CandleKey, ClientOptions, KlineSubscription, MarketDataClient};
pub use config::SyncConfig;
pub use connection::{
    ConnectionManager, ConnectionState, Listener, ReconnectPolicy, SocketConnector,
    SubscriptionHandle,
};
pub use error::{Result, SyncError};
pub use feeds::{CandleFeed, OrderBookFeed, TradeTapeFeed};
pub use order_book::{OrderBook, OrderBookSnapshot};
pub use reducers::{CandleChange, CandleSeries, TradeTape};
pub use services::{MarketSummary, MarketView, SyncServices};
pub use source::{BinanceSource, MarketDataSource, SourceRegistry};
