//! Domain types for the funding-rate arbitrage engine.
//!
//! Everything here is plain data: wire-string enum codecs, order requests
//! and records, position records, instrument snapshots and pair state.
//! Components own their records; all other access goes through cloned
//! snapshots.

mod instrument;
mod order;
mod position;

pub use instrument::{DepthLevel, InstrumentSnapshot, PairState, RecentTrade};
pub use order::{
    MarginType, OrderRecord, OrderRequest, OrderSide, OrderStatus, OrderType, PositionSide,
    TimeInForce,
};
pub use position::PositionRecord;
