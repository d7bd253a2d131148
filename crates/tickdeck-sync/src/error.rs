/*
[INPUT]:  Adapter errors, retry exhaustion, socket give-up, listener failures
[OUTPUT]: SyncError taxonomy surfaced to dashboard consumers
[POS]:    Error handling layer - synchronization boundary errors
[UPDATE]: When adding recovery boundaries or new failure kinds
*/

use thiserror::Error;

use tickdeck_adapter::AdapterError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Every historical fetch attempt failed; carries the last cause
    #[error("historical fetch failed after {attempts} attempt(s): {source}")]
    FetchFailure {
        attempts: u32,
        #[source]
        source: AdapterError,
    },

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Reconnect attempts exhausted for a stream
    #[error("stream {key} failed after {attempts} reconnect attempt(s)")]
    SocketFailure { key: String, attempts: u32 },

    /// A subscriber callback failed; isolated from the dispatch loop
    #[error("listener error: {0}")]
    ListenerError(String),

    /// A background fetch task panicked or was aborted by runtime shutdown
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("unknown market data source: {0}")]
    UnknownSource(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether the dashboard should offer a manual retry
    pub fn is_user_retryable(&self) -> bool {
        matches!(self, SyncError::FetchFailure { .. } | SyncError::Adapter(_))
    }

    /// Convenience for listener callbacks
    pub fn listener(message: impl Into<String>) -> Self {
        SyncError::ListenerError(message.into())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
