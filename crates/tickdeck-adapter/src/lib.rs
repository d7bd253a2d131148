/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public exchange adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod decimal;
pub mod http;
pub mod types;
pub mod ws;

// Re-export commonly used types from http
pub use http::{
    AdapterError,
    ClientConfig,
    DEFAULT_REST_BASE_URL,
    RestClient,
    Result,
};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{
    DEFAULT_WS_BASE_URL,
    StreamEvent,
    WsSession,
    decode_depth,
    decode_kline,
    decode_trade,
};
