/*
[INPUT]:  Exchange payload schemas and serde requirements
[OUTPUT]: Typed Rust structs/enums for candles, book levels and trades
[POS]:    Data layer - domain types shared by REST and streaming paths
[UPDATE]: When payload schemas change or new types added
*/

pub mod enums;
pub mod models;

pub use enums::*;
pub use models::*;
