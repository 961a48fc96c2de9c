//! Generic REST client wrapper around reqwest.

use crate::error::RestError;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default total request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Generic REST client for making HTTP requests against one base URL.
pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    /// Create a new REST client.
    ///
    /// # Arguments
    /// * `base_url` - Base URL for all requests (e.g. "https://fapi.binance.com")
    /// * `timeout` - Total request timeout
    /// * `connect_timeout` - TCP/TLS connect timeout
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, RestError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| RestError::RequestBuild(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a client with the default timeouts (30s total, 10s connect).
    pub fn with_default_timeout(base_url: &str) -> Result<Self, RestError> {
        Self::new(base_url, DEFAULT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a GET request and deserialize the JSON body.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<T, RestError> {
        self.request(Method::GET, path, query, headers).await
    }

    /// Make a POST request and deserialize the JSON body.
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<T, RestError> {
        self.request(Method::POST, path, query, headers).await
    }

    /// Make a POST request that returns an empty body.
    pub async fn post_empty(
        &self,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<(), RestError> {
        let response = self.send(Method::POST, path, query, headers).await?;
        self.handle_empty_response(response).await
    }

    /// Make a PUT request and deserialize the JSON body.
    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<T, RestError> {
        self.request(Method::PUT, path, query, headers).await
    }

    /// Make a DELETE request and deserialize the JSON body.
    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<T, RestError> {
        self.request(Method::DELETE, path, query, headers).await
    }

    /// Make a DELETE request that returns an empty body.
    pub async fn delete_empty(
        &self,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<(), RestError> {
        let response = self.send(Method::DELETE, path, query, headers).await?;
        self.handle_empty_response(response).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<T, RestError> {
        let response = self.send(method, path, query, headers).await?;
        self.handle_response(response).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<Response, RestError> {
        let url = self.build_url(path, query);
        tracing::debug!(method = %method, url = %url, "HTTP request");

        let mut request = self.client.request(method, &url);

        if let Some(hdrs) = headers {
            for (key, value) in hdrs {
                request = request.header(*key, *value);
            }
        }

        Ok(request.send().await?)
    }

    /// Build a full URL from path and optional query string.
    fn build_url(&self, path: &str, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.base_url, path, q),
            _ => format!("{}{}", self.base_url, path),
        }
    }

    /// Handle HTTP response and deserialize JSON body.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, RestError> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            serde_json::from_str(&body).map_err(|e| {
                tracing::warn!(body = %body, error = %e, "failed to parse response");
                RestError::Parse(e.to_string())
            })
        } else {
            Err(self.classify_failure(status.as_u16(), response).await)
        }
    }

    /// Handle HTTP response for endpoints that return an empty body.
    async fn handle_empty_response(&self, response: Response) -> Result<(), RestError> {
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            Err(self.classify_failure(status.as_u16(), response).await)
        }
    }

    async fn classify_failure(&self, status: u16, response: Response) -> RestError {
        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000);

        let body = response.text().await.unwrap_or_default();

        if status == 429 {
            return RestError::RateLimited {
                retry_after_ms: retry_after_ms.unwrap_or(60_000),
            };
        }

        RestError::HttpError {
            status,
            message: body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_no_query() {
        let client = RestClient::with_default_timeout("https://api.example.com").unwrap();
        assert_eq!(
            client.build_url("/fapi/v1/time", None),
            "https://api.example.com/fapi/v1/time"
        );
    }

    #[test]
    fn test_build_url_with_query() {
        let client = RestClient::with_default_timeout("https://api.example.com").unwrap();
        assert_eq!(
            client.build_url("/fapi/v1/order", Some("symbol=BTCUSDT&side=BUY")),
            "https://api.example.com/fapi/v1/order?symbol=BTCUSDT&side=BUY"
        );
    }

    #[test]
    fn test_build_url_strips_trailing_slash() {
        let client = RestClient::with_default_timeout("https://api.example.com/").unwrap();
        assert_eq!(
            client.build_url("/fapi/v1/time", None),
            "https://api.example.com/fapi/v1/time"
        );
    }

    #[test]
    fn test_build_url_empty_query() {
        let client = RestClient::with_default_timeout("https://api.example.com").unwrap();
        assert_eq!(
            client.build_url("/fapi/v1/time", Some("")),
            "https://api.example.com/fapi/v1/time"
        );
    }
}
