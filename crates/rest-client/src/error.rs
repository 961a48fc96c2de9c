//! REST client error types.

use thiserror::Error;

/// HTTP status codes worth retrying with backoff.
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Errors that can occur during REST API calls.
#[derive(Debug, Error)]
pub enum RestError {
    /// HTTP error with status code and response body.
    #[error("HTTP error: {status} - {message}")]
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Error message or response body.
        message: String,
    },

    /// Request timed out.
    #[error("request timeout")]
    Timeout,

    /// Connection error (network or TLS issue).
    #[error("connection error: {0}")]
    Connection(String),

    /// Failed to parse response body as JSON.
    #[error("JSON parse error: {0}")]
    Parse(String),

    /// Rate limited by the server (HTTP 429).
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait time before retrying.
        retry_after_ms: u64,
    },

    /// Failed to build the HTTP client.
    #[error("request build error: {0}")]
    RequestBuild(String),
}

impl RestError {
    /// Whether the adapter's retry policy should re-attempt this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            RestError::Timeout | RestError::Connection(_) | RestError::RateLimited { .. } => true,
            RestError::HttpError { status, .. } => RETRYABLE_STATUS_CODES.contains(status),
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RestError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RestError::Timeout
        } else if err.is_connect() {
            RestError::Connection(err.to_string())
        } else if err.is_decode() {
            RestError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            RestError::HttpError {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            RestError::Connection(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        for status in RETRYABLE_STATUS_CODES {
            let err = RestError::HttpError {
                status,
                message: String::new(),
            };
            assert!(err.is_retryable(), "status {} should be retryable", status);
        }
    }

    #[test]
    fn test_non_retryable_statuses() {
        for status in [400, 401, 403, 404, 418] {
            let err = RestError::HttpError {
                status,
                message: String::new(),
            };
            assert!(!err.is_retryable(), "status {} should not retry", status);
        }
    }

    #[test]
    fn test_transport_errors_retryable() {
        assert!(RestError::Timeout.is_retryable());
        assert!(RestError::Connection("reset".into()).is_retryable());
        assert!(RestError::RateLimited { retry_after_ms: 0 }.is_retryable());
        assert!(!RestError::Parse("bad json".into()).is_retryable());
    }
}
