//! Generic REST client infrastructure.
//!
//! A thin wrapper around `reqwest` providing:
//!
//! - Consistent error handling via `RestError`
//! - GET/POST/PUT/DELETE with optional query strings and headers
//! - JSON response deserialization
//! - HTTP status classification, including the retryable set
//!   {408, 429, 500, 502, 503, 504}

mod client;
mod error;

pub use client::RestClient;
pub use error::{RestError, RETRYABLE_STATUS_CODES};
