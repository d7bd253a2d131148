/*
[INPUT]:  Stream endpoint URLs and raw stream frames
[OUTPUT]: Text-frame sessions and decoded stream events
[POS]:    WebSocket layer - real-time data streams
[UPDATE]: When adding new stream types or changing connection logic
*/

pub mod client;
pub mod message;

pub use client::{DEFAULT_WS_BASE_URL, WsSession};
pub use message::{StreamEvent, decode_depth, decode_kline, decode_trade};
