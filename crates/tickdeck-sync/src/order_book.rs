/*
[INPUT]:  Validated depth update batches (price, quantity pairs per side)
[OUTPUT]: Sorted, bounded bid/ask level sets and immutable snapshots
[POS]:    State layer - incremental order book reconstruction
[UPDATE]: When changing depth bounds, ordering rules or removal semantics
*/

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tickdeck_adapter::decimal::midpoint;
use tickdeck_adapter::{DepthUpdate, OrderBookLevel};

pub const DEFAULT_BOOK_DEPTH: usize = 100;

/// Immutable view of both sides after a whole batch was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderBookSnapshot {
    /// Descending by price
    pub bids: Vec<OrderBookLevel>,
    /// Ascending by price
    pub asks: Vec<OrderBookLevel>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<&OrderBookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&OrderBookLevel> {
        self.asks.first()
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        midpoint(self.best_bid()?.price, self.best_ask()?.price)
    }
}

/// Local order book keyed by exact decimal price.
///
/// `BTreeMap<Decimal, _>` keeps each side ordered by value, so `"100.10"` and
/// `"100.1"` address the same level and ordering never goes through `f64`.
#[derive(Debug, Clone)]
pub struct OrderBook {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    depth: usize,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_BOOK_DEPTH)
    }

    pub fn with_depth(depth: usize) -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            depth: depth.max(1),
        }
    }

    /// Apply one batch. Zero quantity removes the level, anything else
    /// inserts or overwrites it. Each side is truncated to `depth` afterwards.
    pub fn apply(&mut self, update: &DepthUpdate) {
        if !update.bids.is_empty() {
            apply_side(&mut self.bids, &update.bids);
            // best bids are the highest prices: drop from the low end
            while self.bids.len() > self.depth {
                self.bids.pop_first();
            }
        }

        if !update.asks.is_empty() {
            apply_side(&mut self.asks, &update.asks);
            while self.asks.len() > self.depth {
                self.asks.pop_last();
            }
        }
    }

    /// Clear both sides, e.g. before switching symbols.
    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    pub fn snapshot(&self) -> OrderBookSnapshot {
        OrderBookSnapshot {
            bids: self
                .bids
                .iter()
                .rev()
                .map(|(price, quantity)| OrderBookLevel::new(*price, *quantity))
                .collect(),
            asks: self
                .asks
                .iter()
                .map(|(price, quantity)| OrderBookLevel::new(*price, *quantity))
                .collect(),
        }
    }

    pub fn shared_snapshot(&self) -> Arc<OrderBookSnapshot> {
        Arc::new(self.snapshot())
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn bid_len(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_len(&self) -> usize {
        self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_side(side: &mut BTreeMap<Decimal, Decimal>, levels: &[OrderBookLevel]) {
    for level in levels {
        if level.is_removal() {
            side.remove(&level.price);
        } else {
            side.insert(level.price, level.quantity);
        }
    }
}
