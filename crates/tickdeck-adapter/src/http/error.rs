/*
[INPUT]:  Error sources (HTTP, status codes, payload shape, decimals, WebSocket)
[OUTPUT]: Structured error types with retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the exchange adapter
#[derive(Error, Debug)]
pub enum AdapterError {
    /// HTTP transport failed (connect, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-2xx status
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Payload had the wrong top-level shape
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A numeric field could not be parsed
    #[error("Failed to parse {field} from {value:?}")]
    Parse { field: String, value: String },

    /// Streaming payload did not match any known event shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Decimal arithmetic failed (overflow, division by zero)
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl AdapterError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::Http(_)
                | AdapterError::HttpStatus { .. }
                | AdapterError::InvalidFormat(_)
                | AdapterError::Parse { .. }
                | AdapterError::Serialization(_)
                | AdapterError::WebSocket(_)
        )
    }

    /// HTTP status code, when the failure came from a response
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AdapterError::HttpStatus { status, .. } => Some(*status),
            AdapterError::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    /// Create a status error from a response status and body
    pub fn http_status(status: StatusCode, body: impl Into<String>) -> Self {
        AdapterError::HttpStatus {
            status: status.as_u16(),
            body: body.into(),
        }
    }

    /// Create a parse error for a named field
    pub fn parse(field: impl Into<String>, value: impl Into<String>) -> Self {
        AdapterError::Parse {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;
