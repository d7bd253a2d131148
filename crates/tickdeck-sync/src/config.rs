/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed sync configuration with defaults for every tunable
[POS]:    Configuration layer - service setup
[UPDATE]: When adding new configuration options
*/

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tickdeck_adapter::{DEFAULT_REST_BASE_URL, DEFAULT_WS_BASE_URL, KlineInterval};

use crate::client::ClientOptions;
use crate::connection::ReconnectPolicy;
use crate::error::{Result, SyncError};
use crate::source::BINANCE_SOURCE_ID;

/// Top-level configuration for the sync services
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_rest_base")]
    pub rest_base: String,
    #[serde(default = "default_ws_base")]
    pub ws_base: String,
    /// Market data source id, resolved through the source registry
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub live: LiveConfig,
    /// Markets to follow
    #[serde(default)]
    pub markets: Vec<MarketConfig>,
}

/// Historical fetch and cache tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_cache_expiry_secs")]
    pub cache_expiry_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

/// Stream reconnection tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

/// Live view tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiveConfig {
    #[serde(default = "default_coalesce_interval_ms")]
    pub coalesce_interval_ms: u64,
    #[serde(default = "default_book_depth")]
    pub book_depth: usize,
    #[serde(default = "default_trade_capacity")]
    pub trade_capacity: usize,
    #[serde(default = "default_candle_capacity")]
    pub candle_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketConfig {
    /// Trading pair, e.g. "BTCUSDT"
    pub symbol: String,
    #[serde(default = "default_interval")]
    pub interval: KlineInterval,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            cache_expiry_secs: default_cache_expiry_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            coalesce_interval_ms: default_coalesce_interval_ms(),
            book_depth: default_book_depth(),
            trade_capacity: default_trade_capacity(),
            candle_capacity: default_candle_capacity(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rest_base: default_rest_base(),
            ws_base: default_ws_base(),
            source: default_source(),
            history: HistoryConfig::default(),
            connection: ConnectionConfig::default(),
            live: LiveConfig::default(),
            markets: Vec::new(),
        }
    }
}

fn default_rest_base() -> String {
    DEFAULT_REST_BASE_URL.to_string()
}

fn default_ws_base() -> String {
    DEFAULT_WS_BASE_URL.to_string()
}

fn default_source() -> String {
    BINANCE_SOURCE_ID.to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_cache_expiry_secs() -> u64 {
    60
}

fn default_cache_capacity() -> usize {
    50
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_coalesce_interval_ms() -> u64 {
    16
}

fn default_book_depth() -> usize {
    100
}

fn default_trade_capacity() -> usize {
    50
}

fn default_candle_capacity() -> usize {
    1_000
}

fn default_interval() -> KlineInterval {
    KlineInterval::OneMinute
}

fn default_limit() -> u32 {
    500
}

impl SyncConfig {
    /// Load and validate configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|err| SyncError::Config(format!("read {}: {err}", path.display())))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|err| SyncError::Config(format!("parse yaml: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.history.max_attempts == 0 {
            return Err(SyncError::Config("history.max_attempts must be at least 1".into()));
        }
        if self.history.cache_capacity == 0 {
            return Err(SyncError::Config("history.cache_capacity must be at least 1".into()));
        }
        if self.live.coalesce_interval_ms == 0 {
            return Err(SyncError::Config("live.coalesce_interval_ms must be positive".into()));
        }
        if self.live.book_depth == 0 || self.live.trade_capacity == 0 || self.live.candle_capacity == 0 {
            return Err(SyncError::Config("live capacities must be at least 1".into()));
        }
        for market in &self.markets {
            if market.symbol.trim().is_empty() {
                return Err(SyncError::Config("market symbol must not be empty".into()));
            }
            if market.limit == 0 {
                return Err(SyncError::Config(format!("{}: limit must be at least 1", market.symbol)));
            }
        }
        Ok(())
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            max_attempts: self.history.max_attempts,
            retry_base_delay: Duration::from_millis(self.history.retry_base_delay_ms),
            cache_expiry: Some(self.cache_expiry()),
            coalesce_interval: Duration::from_millis(self.live.coalesce_interval_ms),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.connection.reconnect_base_delay_ms),
            max_attempts: self.connection.max_reconnect_attempts,
        }
    }

    pub fn cache_expiry(&self) -> Duration {
        Duration::from_secs(self.history.cache_expiry_secs)
    }
}
