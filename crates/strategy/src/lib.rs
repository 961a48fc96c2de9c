//! Funding-rate arbitrage strategy engine.
//!
//! Runs a fixed-period control loop: inside the pre-funding window it
//! selects, validates, sizes and opens spot/perpetual pairs; outside it,
//! it monitors open pairs and unwinds them after settlement or on
//! take-profit / stop-loss.

mod engine;
mod params;

pub use engine::{EngineStatus, FundingArbEngine};
pub use params::FundingArbParams;
