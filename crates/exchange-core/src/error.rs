//! Unified error taxonomy for exchange operations.

use thiserror::Error;

/// HTTP status codes the retry policy re-attempts.
pub(crate) const RETRYABLE_STATUS_CODES: [i64; 6] = [408, 429, 500, 502, 503, 504];

/// Every failure surfaced by an exchange adapter classifies into one of
/// these kinds. Transport and rate-limit failures (plus the retryable
/// rejection codes) are recovered inside the adapter; the rest propagate.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Network, TLS, or timeout failure.
    #[error("{operation}: transport error: {message}")]
    Transport {
        /// Operation that failed (e.g. "place_order").
        operation: String,
        message: String,
    },

    /// HTTP 429 from the venue, or the local token bucket refused.
    #[error("{operation}: rate limited")]
    RateLimited { operation: String },

    /// The exchange rejected the request; carries the venue's code.
    #[error("{operation}: rejected by exchange ({code}): {message}")]
    Rejected {
        operation: String,
        code: i64,
        message: String,
    },

    /// The request failed local validation before leaving the process.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or malformed configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A local invariant was violated; indicates a bug in the core.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl ExchangeError {
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn rate_limited(operation: impl Into<String>) -> Self {
        Self::RateLimited {
            operation: operation.into(),
        }
    }

    pub fn rejected(operation: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            code,
            message: message.into(),
        }
    }

    /// Whether the adapter's retry policy should re-attempt this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::RateLimited { .. } => true,
            Self::Rejected { code, .. } => RETRYABLE_STATUS_CODES.contains(code),
            _ => false,
        }
    }

    /// Whether this error should terminate the strategy loop rather than be
    /// absorbed by the per-tick error handler.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ExchangeError::transport("get_mark_price", "reset").is_retryable());
        assert!(ExchangeError::rate_limited("place_order").is_retryable());
        assert!(ExchangeError::rejected("place_order", 503, "unavailable").is_retryable());
    }

    #[test]
    fn test_non_retryable_kinds() {
        assert!(!ExchangeError::rejected("place_order", -2010, "insufficient balance").is_retryable());
        assert!(!ExchangeError::InvalidRequest("qty <= 0".into()).is_retryable());
        assert!(!ExchangeError::Config("missing api key".into()).is_retryable());
        assert!(!ExchangeError::Invariant("negative remaining".into()).is_retryable());
    }

    #[test]
    fn test_only_invariant_is_fatal() {
        assert!(ExchangeError::Invariant("bad state".into()).is_fatal());
        assert!(!ExchangeError::rate_limited("x").is_fatal());
        assert!(!ExchangeError::InvalidRequest("x".into()).is_fatal());
    }
}
