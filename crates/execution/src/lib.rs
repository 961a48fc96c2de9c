//! Order placement and position lifecycle.
//!
//! The order manager owns order records: it validates requests, applies
//! slippage-adjusted pricing, splits large orders into slices, and tracks
//! fills from stream updates, evicting records once terminal. The position
//! manager owns position records and expresses open/close/adjust intents
//! as orders.

mod order_manager;
mod position_manager;

#[cfg(any(test, feature = "test-util"))]
pub mod mock_api;

pub use order_manager::{
    FillOutcome, OrderManager, OrderManagerConfig, SharedOrderManager,
};
pub use position_manager::{OpenOptions, PositionManager, SharedPositionManager};
