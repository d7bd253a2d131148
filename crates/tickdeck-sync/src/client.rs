/*
[INPUT]:  Market data source, shared connection manager, shared historical cache
[OUTPUT]: Cached + deduplicated candle history; coalesced live klines; depth and trade streams
[POS]:    Client layer - the single entry point dashboard views talk to
[UPDATE]: When changing retry policy, cache keys, stream keys or coalescing
*/

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tickdeck_adapter::{
    Candle, DepthUpdate, KlineInterval, Trade, decode_depth, decode_kline, decode_trade,
};

use crate::cache::HistoricalCache;
use crate::connection::{ConnectionManager, Listener, SubscriptionHandle};
use crate::error::{Result, SyncError};
use crate::source::MarketDataSource;

pub const DEFAULT_FETCH_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_COALESCE_INTERVAL: Duration = Duration::from_millis(16);

/// Historical candle cache key: upper-cased symbol, interval and limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: KlineInterval,
    pub limit: u32,
}

impl CandleKey {
    pub fn new(symbol: &str, interval: KlineInterval, limit: u32) -> Self {
        Self {
            symbol: symbol.trim().to_ascii_uppercase(),
            interval,
            limit,
        }
    }
}

impl fmt::Display for CandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.symbol, self.interval, self.limit)
    }
}

pub type CandleCache = HistoricalCache<CandleKey, Arc<Vec<Candle>>>;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    /// `None` uses the cache's default expiry
    pub cache_expiry: Option<Duration>,
    pub coalesce_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_FETCH_ATTEMPTS,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            cache_expiry: None,
            coalesce_interval: DEFAULT_COALESCE_INTERVAL,
        }
    }
}

/// Stream key for live klines, e.g. `btcusdt_1m`.
///
/// The interval code keeps its case so `1M` (month) and `1m` differ.
pub fn kline_stream_key(symbol: &str, interval: KlineInterval) -> String {
    format!("{}_{}", symbol.trim().to_ascii_lowercase(), interval)
}

pub fn depth_stream_key(symbol: &str) -> String {
    format!("{}@depth", symbol.trim().to_ascii_lowercase())
}

pub fn trade_stream_key(symbol: &str) -> String {
    format!("{}@trade", symbol.trim().to_ascii_lowercase())
}

pub struct MarketDataClient {
    connections: ConnectionManager,
    history: Arc<HistoryFetcher>,
}

/// Shared state behind historical fetches. Fetches run on their own task
/// holding an `Arc` of this, so a caller that goes away does not cancel them.
struct HistoryFetcher {
    source: Arc<dyn MarketDataSource>,
    cache: Arc<CandleCache>,
    options: ClientOptions,
    owned_keys: Mutex<HashSet<CandleKey>>,
    in_flight: Mutex<HashMap<CandleKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl fmt::Debug for MarketDataClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketDataClient")
            .field("source", &self.history.source.id())
            .field("options", &self.history.options)
            .finish()
    }
}

impl MarketDataClient {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        connections: ConnectionManager,
        cache: Arc<CandleCache>,
        options: ClientOptions,
    ) -> Self {
        Self {
            connections,
            history: Arc::new(HistoryFetcher {
                source,
                cache,
                options,
                owned_keys: Mutex::new(HashSet::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn source(&self) -> &Arc<dyn MarketDataSource> {
        &self.history.source
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn cache(&self) -> &Arc<CandleCache> {
        &self.history.cache
    }

    pub fn options(&self) -> &ClientOptions {
        &self.history.options
    }

    /// Candle history, served from cache when fresh.
    ///
    /// Concurrent calls for the same key share one upstream fetch. Each fetch
    /// makes up to `max_attempts` tries with linear backoff. The fetch runs on
    /// a spawned task: dropping this future does not cancel it, and a
    /// successful result is cached either way.
    pub async fn fetch_historical(
        &self,
        symbol: &str,
        interval: KlineInterval,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let key = CandleKey::new(symbol, interval, limit);
        if let Some(hit) = self.history.cache.get(&key) {
            debug!(key = %key, candles = hit.len(), "historical cache hit");
            return Ok(hit.as_ref().clone());
        }

        let history = self.history.clone();
        let candles = tokio::spawn(async move { history.fetch_gated(key).await }).await??;
        Ok(candles.as_ref().clone())
    }

    /// Live klines for `symbol`/`interval`, delivering at most one candle
    /// (the latest) per coalescing interval.
    pub fn subscribe<F>(&self, symbol: &str, interval: KlineInterval, callback: F) -> KlineSubscription
    where
        F: Fn(Candle) + Send + Sync + 'static,
    {
        let key = kline_stream_key(symbol, interval);
        let url = self.history.source.kline_stream_url(symbol, interval);
        let pending: Arc<Mutex<Option<Candle>>> = Arc::new(Mutex::new(None));
        let active = Arc::new(AtomicBool::new(true));
        let ticker = CancellationToken::new();

        let slot = pending.clone();
        let listener: Listener = Arc::new(move |message: &Value| -> Result<()> {
            let candle = decode_kline(message)?;
            *slot.lock() = Some(candle);
            Ok(())
        });
        let handle = self.connections.subscribe(&key, &url, listener);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(run_coalescer(
                    key.clone(),
                    self.history.options.coalesce_interval,
                    pending,
                    active.clone(),
                    ticker.clone(),
                    Arc::new(callback),
                ));
            }
            Err(_) => warn!(key, "kline subscription without Tokio runtime; nothing will be delivered"),
        }

        debug!(key, "kline subscription added");
        KlineSubscription {
            handle,
            active,
            ticker,
        }
    }

    /// Depth update batches in arrival order.
    pub fn subscribe_depth<F>(&self, symbol: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(DepthUpdate) + Send + Sync + 'static,
    {
        let key = depth_stream_key(symbol);
        let url = self.history.source.depth_stream_url(symbol);
        let listener: Listener = Arc::new(move |message: &Value| -> Result<()> {
            callback(decode_depth(message)?);
            Ok(())
        });
        self.connections.subscribe(&key, &url, listener)
    }

    /// Individual trades in arrival order.
    pub fn subscribe_trades<F>(&self, symbol: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(Trade) + Send + Sync + 'static,
    {
        let key = trade_stream_key(symbol);
        let url = self.history.source.trade_stream_url(symbol);
        let listener: Listener = Arc::new(move |message: &Value| -> Result<()> {
            callback(decode_trade(message)?);
            Ok(())
        });
        self.connections.subscribe(&key, &url, listener)
    }

    /// Drop the cache entries this client inserted. The shared connection
    /// manager is left alone.
    pub fn destroy(&self) {
        let keys: Vec<CandleKey> = self.history.owned_keys.lock().drain().collect();
        for key in &keys {
            self.history.cache.delete(key);
        }
        info!(source = self.history.source.id(), removed = keys.len(), "market data client destroyed");
    }
}

impl HistoryFetcher {
    async fn fetch_gated(&self, key: CandleKey) -> Result<Arc<Vec<Candle>>> {
        let gate = self.in_flight_gate(&key);
        let guard = gate.lock().await;

        // a concurrent fetch may have filled the cache while we waited
        let result = match self.cache.get(&key) {
            Some(hit) => {
                debug!(key = %key, "historical fetch shared with in-flight request");
                Ok(hit)
            }
            None => {
                let fetched = self.fetch_with_retry(&key).await.map(Arc::new);
                if let Ok(candles) = &fetched {
                    self.cache
                        .set(key.clone(), candles.clone(), self.options.cache_expiry);
                    self.owned_keys.lock().insert(key.clone());
                }
                fetched
            }
        };

        drop(guard);
        self.release_gate(&key, &gate);
        result
    }

    fn in_flight_gate(&self, key: &CandleKey) -> Arc<tokio::sync::Mutex<()>> {
        self.in_flight
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Removes the gate once no other fetch holds or waits on it.
    fn release_gate(&self, key: &CandleKey, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, gate) && Arc::strong_count(gate) <= 2)
        {
            in_flight.remove(key);
        }
    }

    async fn fetch_with_retry(&self, key: &CandleKey) -> Result<Vec<Candle>> {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self
                .source
                .fetch_klines(&key.symbol, key.interval, key.limit)
                .await
            {
                Ok(candles) => {
                    info!(key = %key, attempt, candles = candles.len(), "historical candles fetched");
                    return Ok(candles);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.options.retry_base_delay.saturating_mul(attempt);
                    warn!(key = %key, attempt, ?delay, error = %err, "historical fetch failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(key = %key, attempts = attempt, error = %err, "historical fetch gave up");
                    return Err(SyncError::FetchFailure {
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }
}

async fn run_coalescer(
    key: String,
    period: Duration,
    pending: Arc<Mutex<Option<Candle>>>,
    active: Arc<AtomicBool>,
    shutdown: CancellationToken,
    callback: Arc<dyn Fn(Candle) + Send + Sync>,
) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let latest = pending.lock().take();
                if let Some(candle) = latest {
                    if !active.load(Ordering::Acquire) {
                        break;
                    }
                    callback(candle);
                }
            }
        }
    }
    debug!(key, "kline coalescer stopped");
}

/// Live kline subscription; unsubscribes on `unsubscribe` or drop.
#[derive(Debug)]
pub struct KlineSubscription {
    handle: SubscriptionHandle,
    active: Arc<AtomicBool>,
    ticker: CancellationToken,
}

impl KlineSubscription {
    pub fn key(&self) -> &str {
        self.handle.key()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for KlineSubscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        self.ticker.cancel();
    }
}
