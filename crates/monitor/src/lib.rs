//! Monitoring: periodic metric snapshots, threshold alerting, and a
//! Prometheus text exposition endpoint.
//!
//! The monitor only observes. It reaches the strategy and risk sides
//! through narrow read-only interfaces and never mutates trading state,
//! with one exception: repeated collection failures engage the risk
//! controller's emergency mode.

mod alert;
mod prometheus;
mod service;

pub use alert::{AlertSink, LogAlertSink};
pub use prometheus::render_metrics;
pub use service::{
    MonitorConfig, MonitorService, MonitorSnapshot, PositionMetrics, StrategyObserver,
};
