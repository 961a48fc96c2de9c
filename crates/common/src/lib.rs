//! Shared infrastructure: config tree, rate limiting, backoff, logging.

pub mod backoff;
pub mod config;
pub mod logging;
pub mod rate_limit;

pub use backoff::ExponentialBackoff;
pub use config::{ConfigError, ConfigTree};
pub use logging::init_logging;
pub use rate_limit::RateLimiter;
