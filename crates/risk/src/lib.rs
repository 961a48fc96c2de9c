//! Risk controller: pre-trade checks, continuous monitoring, drawdown
//! tracking and automated de-risking.

mod controller;
mod drawdown;
mod types;

pub use controller::{RiskController, SharedRiskController};
pub use drawdown::DrawdownTracker;
pub use types::{
    RiskControlSettings, RiskEvent, RiskEventType, RiskLimits, RiskMetrics, RiskReport,
};
