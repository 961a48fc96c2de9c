//! API credential handling.
//!
//! The secret key lives in a `SecretString` so it cannot leak through Debug
//! output and is zeroed on drop.

use crate::error::AuthError;
use secrecy::{ExposeSecret, SecretString};

/// API key pair for authenticated requests.
#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
    secret_key: SecretString,
}

impl ApiCredentials {
    /// Load credentials from `EXCHANGE_API_KEY` / `EXCHANGE_API_SECRET`.
    ///
    /// A `.env` file in the working directory is honoured if present.
    pub fn from_env() -> Result<Self, AuthError> {
        dotenvy::dotenv().ok();

        let api_key = std::env::var("EXCHANGE_API_KEY")
            .map_err(|_| AuthError::MissingEnvVar("EXCHANGE_API_KEY".into()))?;

        let secret_key = std::env::var("EXCHANGE_API_SECRET")
            .map_err(|_| AuthError::MissingEnvVar("EXCHANGE_API_SECRET".into()))?;

        Ok(Self::new(api_key, secret_key))
    }

    /// Create credentials from explicit values (tests, alternative sources).
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key,
            secret_key: SecretString::new(secret_key),
        }
    }

    /// The API key (public, safe to log).
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Expose the secret for signing only. Never log the return value.
    pub fn expose_secret(&self) -> &str {
        self.secret_key.expose_secret()
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}
