//! HMAC-SHA256 request signing.
//!
//! Every authenticated request carries a millisecond timestamp and a
//! lowercase-hex HMAC-SHA256 signature over the canonical query string.

use crate::credentials::ApiCredentials;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs canonical query strings for authenticated endpoints.
pub struct RequestSigner<'a> {
    credentials: &'a ApiCredentials,
}

impl<'a> RequestSigner<'a> {
    pub fn new(credentials: &'a ApiCredentials) -> Self {
        Self { credentials }
    }

    /// HMAC-SHA256 of `message` under the secret key, as lowercase hex.
    pub fn sign(&self, message: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.credentials.expose_secret().as_bytes())
            .expect("HMAC can take key of any size");

        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Build a signed query string: parameters in the given order, then
    /// `timestamp=<ms>`, then `signature=<hex>` over everything before it.
    pub fn sign_params(&self, params: &[(&str, &str)], timestamp_ms: i64) -> String {
        let mut query_parts: Vec<String> =
            params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        query_parts.push(format!("timestamp={}", timestamp_ms));

        let query_string = query_parts.join("&");
        let signature = self.sign(&query_string);
        format!("{}&signature={}", query_string, signature)
    }

    /// Like [`sign_params`](Self::sign_params) with a `recvWindow` bound on
    /// how long the venue may hold the request.
    pub fn sign_params_with_recv_window(
        &self,
        params: &[(&str, &str)],
        timestamp_ms: i64,
        recv_window_ms: u64,
    ) -> String {
        let recv_window = recv_window_ms.to_string();
        let mut all: Vec<(&str, &str)> = params.to_vec();
        all.push(("recvWindow", &recv_window));
        self.sign_params(&all, timestamp_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_known_vector() {
        // Test vector from the Binance signed-endpoint documentation
        let creds = ApiCredentials::new(
            "vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A".into(),
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j".into(),
        );

        let signer = RequestSigner::new(&creds);

        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        let signature = signer.sign(query);

        assert_eq!(
            signature,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_signature_is_64_lowercase_hex_chars() {
        let creds = ApiCredentials::new("key".into(), "secret".into());
        let signer = RequestSigner::new(&creds);

        let signature = signer.sign("symbol=BTCUSDT&timestamp=1000");
        assert_eq!(signature.len(), 64);
        assert!(signature
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_sign_params_appends_timestamp_then_signature() {
        let creds = ApiCredentials::new("key".into(), "secret".into());
        let signer = RequestSigner::new(&creds);

        let params = [("symbol", "BTCUSDT"), ("side", "BUY")];
        let result = signer.sign_params(&params, 1000);

        assert!(result.starts_with("symbol=BTCUSDT&side=BUY&timestamp=1000&signature="));
    }

    #[test]
    fn test_sign_params_with_recv_window() {
        let creds = ApiCredentials::new("key".into(), "secret".into());
        let signer = RequestSigner::new(&creds);

        let result = signer.sign_params_with_recv_window(&[("symbol", "BTCUSDT")], 1000, 5000);
        assert!(result.contains("recvWindow=5000"));
        assert!(result.contains("timestamp=1000"));
    }

    #[test]
    fn test_sign_empty_message() {
        let creds = ApiCredentials::new("key".into(), "secret".into());
        let signer = RequestSigner::new(&creds);

        let signature = signer.sign("");
        assert_eq!(signature.len(), 64);
    }
}
