/*
[INPUT]:  Decoded trades, historical candle series and live candles
[OUTPUT]: Bounded newest-first trade tape and merged candle series
[POS]:    State layer - stream reducers feeding dashboard views
[UPDATE]: When changing retention bounds or candle merge rules
*/

use std::collections::VecDeque;

use tickdeck_adapter::{normalize_candles, Candle, Trade};

pub const DEFAULT_TRADE_CAPACITY: usize = 50;
pub const DEFAULT_CANDLE_CAPACITY: usize = 1_000;

/// Most recent trades, newest first.
#[derive(Debug, Clone)]
pub struct TradeTape {
    trades: VecDeque<Trade>,
    capacity: usize,
}

impl TradeTape {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            trades: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns false when the trade id is already on the tape.
    pub fn push(&mut self, trade: Trade) -> bool {
        if self.trades.iter().any(|existing| existing.id == trade.id) {
            return false;
        }

        self.trades.push_front(trade);
        self.trades.truncate(self.capacity);
        true
    }

    pub fn latest(&self) -> Option<&Trade> {
        self.trades.front()
    }

    pub fn to_vec(&self) -> Vec<Trade> {
        self.trades.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn clear(&mut self) {
        self.trades.clear();
    }
}

impl Default for TradeTape {
    fn default() -> Self {
        Self::new(DEFAULT_TRADE_CAPACITY)
    }
}

/// What a live candle did to the series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleChange {
    /// Same open time as the last candle: still open, replaced in place
    Replaced,
    /// Newer open time: appended
    Appended,
    /// Older than the last candle: closed candles are immutable
    Stale,
}

/// Ascending candle series where only the last candle may change.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl CandleSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Replace the whole series with fetched history.
    pub fn replace_all(&mut self, history: Vec<Candle>) {
        let mut normalized = normalize_candles(history);
        if normalized.len() > self.capacity {
            normalized.drain(..normalized.len() - self.capacity);
        }
        self.candles = normalized.into();
    }

    pub fn apply(&mut self, candle: Candle) -> CandleChange {
        match self.candles.back().map(|last| last.open_time) {
            Some(last_open) if last_open == candle.open_time => {
                if let Some(last) = self.candles.back_mut() {
                    *last = candle;
                }
                CandleChange::Replaced
            }
            Some(last_open) if candle.open_time < last_open => CandleChange::Stale,
            _ => {
                self.candles.push_back(candle);
                while self.candles.len() > self.capacity {
                    self.candles.pop_front();
                }
                CandleChange::Appended
            }
        }
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn clear(&mut self) {
        self.candles.clear();
    }
}

impl Default for CandleSeries {
    fn default() -> Self {
        Self::new(DEFAULT_CANDLE_CAPACITY)
    }
}
