/*
[INPUT]:  HTTP client configuration and public API endpoints
[OUTPUT]: HTTP responses and typed API results
[POS]:    HTTP layer - REST API communication
[UPDATE]: When adding new endpoints or changing client behavior
*/

pub mod client;
pub mod error;
pub mod public;

pub use error::{AdapterError, Result};

pub use client::{ClientConfig, DEFAULT_REST_BASE_URL, RestClient};
