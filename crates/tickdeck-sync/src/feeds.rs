/*
[INPUT]:  Market data client subscriptions (klines, depth, trades)
[OUTPUT]: watch channels of immutable candle / order book / trade tape snapshots
[POS]:    Feed layer - apply-then-publish glue between streams and dashboard views
[UPDATE]: When changing what views consume or how symbol switching works
*/

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

use tickdeck_adapter::{Candle, KlineInterval, Trade};

use crate::client::{KlineSubscription, MarketDataClient};
use crate::connection::SubscriptionHandle;
use crate::error::Result;
use crate::order_book::{OrderBook, OrderBookSnapshot};
use crate::reducers::{CandleChange, CandleSeries, TradeTape};

/// Candle chart feed: history first, then the live in-progress candle.
#[derive(Debug)]
pub struct CandleFeed {
    symbol: String,
    interval: KlineInterval,
    series: watch::Receiver<Arc<Vec<Candle>>>,
    _subscription: KlineSubscription,
}

impl CandleFeed {
    pub async fn start(
        client: &MarketDataClient,
        symbol: &str,
        interval: KlineInterval,
        limit: u32,
        capacity: usize,
    ) -> Result<Self> {
        let history = client.fetch_historical(symbol, interval, limit).await?;

        let mut series = CandleSeries::new(capacity);
        series.replace_all(history);
        let (tx, rx) = watch::channel(Arc::new(series.to_vec()));
        info!(symbol, %interval, candles = series.len(), "candle feed loaded history");

        let series = Mutex::new(series);
        let publish_symbol = symbol.to_string();
        let subscription = client.subscribe(symbol, interval, move |candle| {
            let mut series = series.lock();
            match series.apply(candle) {
                CandleChange::Stale => {
                    debug!(symbol = %publish_symbol, open_time = candle.open_time, "stale candle ignored");
                }
                CandleChange::Replaced | CandleChange::Appended => {
                    tx.send_replace(Arc::new(series.to_vec()));
                }
            }
        });

        Ok(Self {
            symbol: symbol.to_string(),
            interval,
            series: rx,
            _subscription: subscription,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> KlineInterval {
        self.interval
    }

    pub fn latest(&self) -> Arc<Vec<Candle>> {
        self.series.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<Vec<Candle>>> {
        self.series.clone()
    }
}

struct BookState {
    book: OrderBook,
    generation: u64,
}

/// Live order book for one symbol at a time.
pub struct OrderBookFeed {
    client: Arc<MarketDataClient>,
    symbol: String,
    state: Arc<Mutex<BookState>>,
    snapshots: Arc<watch::Sender<Arc<OrderBookSnapshot>>>,
    subscription: Option<SubscriptionHandle>,
}

impl std::fmt::Debug for OrderBookFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBookFeed")
            .field("symbol", &self.symbol)
            .finish()
    }
}

impl OrderBookFeed {
    pub fn start(client: Arc<MarketDataClient>, symbol: &str, depth: usize) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(OrderBookSnapshot::default()));
        let mut feed = Self {
            client,
            symbol: String::new(),
            state: Arc::new(Mutex::new(BookState {
                book: OrderBook::with_depth(depth),
                generation: 0,
            })),
            snapshots: Arc::new(tx),
            subscription: None,
        };
        feed.switch_symbol(symbol);
        feed
    }

    /// Drop the current stream, clear the book and follow `symbol`.
    ///
    /// Batches of the previous symbol still in flight are discarded.
    pub fn switch_symbol(&mut self, symbol: &str) {
        self.subscription.take();

        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.book.reset();
            self.snapshots.send_replace(Arc::new(OrderBookSnapshot::default()));
            state.generation
        };

        let previous = std::mem::replace(&mut self.symbol, symbol.to_string());
        if !previous.is_empty() {
            info!(from = %previous, to = symbol, "order book switched symbol");
        }

        let state = self.state.clone();
        let snapshots = self.snapshots.clone();
        let handle = self.client.subscribe_depth(symbol, move |update| {
            let mut state = state.lock();
            if state.generation != generation {
                return;
            }
            state.book.apply(&update);
            snapshots.send_replace(state.book.shared_snapshot());
        });
        self.subscription = Some(handle);
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn latest(&self) -> Arc<OrderBookSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<OrderBookSnapshot>> {
        self.snapshots.subscribe()
    }
}

/// Recent trades, newest first.
#[derive(Debug)]
pub struct TradeTapeFeed {
    symbol: String,
    trades: watch::Receiver<Arc<Vec<Trade>>>,
    _subscription: SubscriptionHandle,
}

impl TradeTapeFeed {
    pub fn start(client: &MarketDataClient, symbol: &str, capacity: usize) -> Self {
        let (tx, rx) = watch::channel(Arc::new(Vec::new()));
        let tape = Mutex::new(TradeTape::new(capacity));

        let subscription = client.subscribe_trades(symbol, move |trade| {
            let mut tape = tape.lock();
            if tape.push(trade) {
                tx.send_replace(Arc::new(tape.to_vec()));
            }
        });

        Self {
            symbol: symbol.to_string(),
            trades: rx,
            _subscription: subscription,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn latest(&self) -> Arc<Vec<Trade>> {
        self.trades.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<Vec<Trade>>> {
        self.trades.clone()
    }
}
