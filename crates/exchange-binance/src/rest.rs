//! Signed REST adapter over the Binance spot and USD-M futures surfaces.

use crate::convert::{
    map_rest_error, order_record_from_response, position_record_from_response,
};
use crate::responses::{
    BalanceResponse, BookTickerResponse, DepthResponse, ExchangeInfoResponse, OrderResponse,
    PositionRiskResponse, PremiumIndexResponse, ServerTimeResponse, Ticker24hResponse,
    TickerPriceResponse, TradeResponse,
};
use async_trait::async_trait;
use auth::{ApiCredentials, RequestSigner};
use common::{ExponentialBackoff, RateLimiter};
use exchange_core::{ExchangeApi, ExchangeError};
use model::{
    DepthLevel, MarginType, OrderRecord, OrderRequest, OrderType, PositionRecord, RecentTrade,
    TimeInForce,
};
use rest_client::{RestClient, RestError};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Cap on the delay between retry attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Configuration for the REST adapter.
#[derive(Debug, Clone)]
pub struct BinanceApiConfig {
    /// Futures REST base URL.
    pub futures_base_url: String,
    /// Spot REST base URL.
    pub spot_base_url: String,
    /// Total request timeout.
    pub timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// General request budget per second.
    pub requests_per_second: usize,
    /// Order placement budget per second (stricter).
    pub orders_per_second: usize,
    /// Retry attempts for transient failures.
    pub max_retries: u32,
    /// Initial retry delay.
    pub retry_delay: Duration,
    /// Retry delay multiplier.
    pub backoff_multiplier: f64,
    /// recvWindow for signed requests.
    pub recv_window_ms: u64,
}

impl Default for BinanceApiConfig {
    fn default() -> Self {
        Self {
            futures_base_url: "https://fapi.binance.com".into(),
            spot_base_url: "https://api.binance.com".into(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            requests_per_second: 20,
            orders_per_second: 5,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            recv_window_ms: 5000,
        }
    }
}

/// Binance REST adapter implementing [`ExchangeApi`].
pub struct BinanceApi {
    futures: RestClient,
    spot: RestClient,
    credentials: ApiCredentials,
    config: BinanceApiConfig,
    request_limiter: RateLimiter,
    order_limiter: RateLimiter,
    /// local - server clock offset in milliseconds.
    time_offset_ms: AtomicI64,
    /// Sequence for client order ids.
    order_seq: AtomicU64,
}

impl BinanceApi {
    /// Build an adapter for the given credentials and configuration.
    pub fn new(
        credentials: ApiCredentials,
        config: BinanceApiConfig,
    ) -> Result<Self, ExchangeError> {
        let futures =
            RestClient::new(&config.futures_base_url, config.timeout, config.connect_timeout)
                .map_err(|e| ExchangeError::Config(e.to_string()))?;
        let spot = RestClient::new(&config.spot_base_url, config.timeout, config.connect_timeout)
            .map_err(|e| ExchangeError::Config(e.to_string()))?;

        Ok(Self {
            futures,
            spot,
            credentials,
            request_limiter: RateLimiter::new(config.requests_per_second, config.requests_per_second),
            order_limiter: RateLimiter::new(config.orders_per_second, config.orders_per_second),
            config,
            time_offset_ms: AtomicI64::new(0),
            order_seq: AtomicU64::new(0),
        })
    }

    /// Estimated current server timestamp.
    pub fn server_timestamp_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() - self.time_offset_ms.load(Ordering::Relaxed)
    }

    /// Synchronize the local clock offset with the futures server time.
    ///
    /// Call on startup and whenever the venue starts rejecting timestamps.
    pub async fn sync_time(&self) -> Result<(), ExchangeError> {
        let before = std::time::Instant::now();
        let response: ServerTimeResponse = self
            .futures
            .get("/fapi/v1/time", None, None)
            .await
            .map_err(|e| map_rest_error("sync_time", e))?;
        let rtt = before.elapsed().as_millis() as i64;

        let local_time = chrono::Utc::now().timestamp_millis();
        let estimated_server_time = response.server_time + rtt / 2;
        let offset = local_time - estimated_server_time;

        self.time_offset_ms.store(offset, Ordering::Relaxed);

        tracing::info!(
            server_time = response.server_time,
            offset_ms = offset,
            rtt_ms = rtt,
            "time synchronized with exchange"
        );

        Ok(())
    }

    fn next_client_order_id(&self) -> String {
        let seq = self.order_seq.fetch_add(1, Ordering::Relaxed);
        format!("fa-{}-{}", self.server_timestamp_ms(), seq)
    }

    fn surface(&self, is_spot: bool) -> &RestClient {
        if is_spot {
            &self.spot
        } else {
            &self.futures
        }
    }

    fn order_path(is_spot: bool) -> &'static str {
        if is_spot {
            "/api/v3/order"
        } else {
            "/fapi/v1/order"
        }
    }

    /// Run `call` under the retry policy: transient failures retry on the
    /// backoff schedule, up to `max_retries` attempts; everything else
    /// propagates unchanged.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ExchangeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RestError>>,
    {
        let mut backoff = ExponentialBackoff::new(
            self.config.retry_delay,
            MAX_RETRY_DELAY,
            self.config.backoff_multiplier,
            0.0,
        );

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let mapped = map_rest_error(operation, err);
                    if !mapped.is_retryable() || backoff.attempt() + 1 >= self.config.max_retries {
                        return Err(mapped);
                    }

                    let delay = backoff.next_delay();
                    tracing::warn!(
                        operation = operation,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %mapped,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn signed_query(&self, params: &[(&str, &str)]) -> String {
        let signer = RequestSigner::new(&self.credentials);
        signer.sign_params_with_recv_window(
            params,
            self.server_timestamp_ms(),
            self.config.recv_window_ms,
        )
    }

    fn auth_headers(&self) -> [(&str, &str); 1] {
        [("X-MBX-APIKEY", self.credentials.api_key())]
    }

    fn build_order_params(&self, request: &OrderRequest) -> Result<Vec<(String, String)>, ExchangeError> {
        if request.symbol.is_empty() {
            return Err(ExchangeError::InvalidRequest("empty symbol".into()));
        }
        if request.quantity <= Decimal::ZERO {
            return Err(ExchangeError::InvalidRequest(format!(
                "quantity must be positive, got {}",
                request.quantity
            )));
        }

        let mut params: Vec<(String, String)> = vec![
            ("symbol".into(), request.symbol.clone()),
            ("side".into(), request.side.as_wire().into()),
            ("type".into(), wire_order_type(request.order_type, request.is_spot).into()),
            ("quantity".into(), request.quantity.to_string()),
            ("newClientOrderId".into(), self.next_client_order_id()),
        ];

        if let Some(price) = request.price {
            params.push(("price".into(), price.to_string()));
        }
        if let Some(stop_price) = request.stop_price {
            params.push(("stopPrice".into(), stop_price.to_string()));
        }
        // LIMIT_MAKER on the spot surface takes no timeInForce
        let wants_tif =
            request.order_type.requires_price() && !(request.is_spot && request.order_type == OrderType::PostOnly);
        if wants_tif {
            let tif = if request.order_type == OrderType::PostOnly {
                TimeInForce::GTX
            } else {
                request.time_in_force
            };
            params.push(("timeInForce".into(), tif.as_wire().into()));
        }

        if !request.is_spot {
            params.push(("positionSide".into(), request.position_side.as_wire().into()));
            if request.reduce_only {
                params.push(("reduceOnly".into(), "true".into()));
            }
            if request.close_position {
                params.push(("closePosition".into(), "true".into()));
            }
        }

        for (key, value) in &request.extra_params {
            params.push((key.clone(), value.clone()));
        }

        Ok(params)
    }
}

/// The venue spells some order types differently per surface.
fn wire_order_type(order_type: OrderType, is_spot: bool) -> &'static str {
    match (order_type, is_spot) {
        (OrderType::PostOnly, true) => "LIMIT_MAKER",
        // GTX time-in-force carries post-only semantics on futures
        (OrderType::PostOnly, false) => "LIMIT",
        (OrderType::StopLimit, false) => "STOP",
        _ => order_type.as_wire(),
    }
}

#[async_trait]
impl ExchangeApi for BinanceApi {
    async fn all_symbols(&self) -> Result<Vec<String>, ExchangeError> {
        self.request_limiter.acquire().await;
        let response: ExchangeInfoResponse = self
            .with_retry("all_symbols", || {
                self.futures.get("/fapi/v1/exchangeInfo", None, None)
            })
            .await?;

        Ok(response
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING" && s.contract_type == "PERPETUAL")
            .map(|s| s.symbol)
            .collect())
    }

    async fn funding_rate(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.request_limiter.acquire().await;
        let query = format!("symbol={}", symbol);
        let response: PremiumIndexResponse = self
            .with_retry("funding_rate", || {
                self.futures.get("/fapi/v1/premiumIndex", Some(&query), None)
            })
            .await?;
        Ok(response.last_funding_rate)
    }

    async fn mark_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.request_limiter.acquire().await;
        let query = format!("symbol={}", symbol);
        let response: PremiumIndexResponse = self
            .with_retry("mark_price", || {
                self.futures.get("/fapi/v1/premiumIndex", Some(&query), None)
            })
            .await?;
        Ok(response.mark_price)
    }

    async fn spot_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.request_limiter.acquire().await;
        let query = format!("symbol={}", symbol);
        let response: TickerPriceResponse = self
            .with_retry("spot_price", || {
                self.spot.get("/api/v3/ticker/price", Some(&query), None)
            })
            .await?;
        Ok(response.price)
    }

    async fn last_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.request_limiter.acquire().await;
        let query = format!("symbol={}", symbol);
        let response: TickerPriceResponse = self
            .with_retry("last_price", || {
                self.futures.get("/fapi/v1/ticker/price", Some(&query), None)
            })
            .await?;
        Ok(response.price)
    }

    async fn next_funding_time_ms(&self, symbol: &str) -> Result<i64, ExchangeError> {
        self.request_limiter.acquire().await;
        let query = format!("symbol={}", symbol);
        let response: PremiumIndexResponse = self
            .with_retry("next_funding_time", || {
                self.futures.get("/fapi/v1/premiumIndex", Some(&query), None)
            })
            .await?;
        Ok(response.next_funding_time)
    }

    async fn volume_24h(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.request_limiter.acquire().await;
        let query = format!("symbol={}", symbol);
        let response: Ticker24hResponse = self
            .with_retry("volume_24h", || {
                self.futures.get("/fapi/v1/ticker/24hr", Some(&query), None)
            })
            .await?;
        Ok(response.volume)
    }

    async fn best_bid_ask(&self, symbol: &str) -> Result<(Decimal, Decimal), ExchangeError> {
        self.request_limiter.acquire().await;
        let query = format!("symbol={}", symbol);
        let response: BookTickerResponse = self
            .with_retry("best_bid_ask", || {
                self.futures
                    .get("/fapi/v1/ticker/bookTicker", Some(&query), None)
            })
            .await?;
        Ok((response.bid_price, response.ask_price))
    }

    async fn order_book_depth(
        &self,
        symbol: &str,
        is_spot: bool,
    ) -> Result<Vec<DepthLevel>, ExchangeError> {
        self.request_limiter.acquire().await;
        let query = format!("symbol={}&limit=100", symbol);
        let path = if is_spot { "/api/v3/depth" } else { "/fapi/v1/depth" };
        let response: DepthResponse = self
            .with_retry("order_book_depth", || {
                self.surface(is_spot).get(path, Some(&query), None)
            })
            .await?;

        // Interleave the two sides level by level, best inward, so that
        // summing the sequence approximates displayed near-top liquidity.
        let mut levels = Vec::with_capacity(response.bids.len() + response.asks.len());
        let mut bids = response.bids.iter();
        let mut asks = response.asks.iter();
        loop {
            match (bids.next(), asks.next()) {
                (None, None) => break,
                (bid, ask) => {
                    if let Some([price, qty]) = bid {
                        levels.push(DepthLevel::new(*price, *qty));
                    }
                    if let Some([price, qty]) = ask {
                        levels.push(DepthLevel::new(*price, *qty));
                    }
                }
            }
        }
        Ok(levels)
    }

    async fn recent_trades(
        &self,
        symbol: &str,
        window: Duration,
    ) -> Result<Vec<RecentTrade>, ExchangeError> {
        self.request_limiter.acquire().await;
        let query = format!("symbol={}&limit=1000", symbol);
        let response: Vec<TradeResponse> = self
            .with_retry("recent_trades", || {
                self.futures.get("/fapi/v1/trades", Some(&query), None)
            })
            .await?;

        let cutoff_ms = self.server_timestamp_ms() - window.as_millis() as i64;
        Ok(response
            .into_iter()
            .filter(|t| t.time >= cutoff_ms)
            .map(|t| RecentTrade {
                price: t.price,
                qty: t.qty,
                time_ms: t.time,
            })
            .collect())
    }

    async fn balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        self.request_limiter.acquire().await;
        let response: Vec<BalanceResponse> = self
            .with_retry("balance", || {
                let query = self.signed_query(&[]);
                let headers = self.auth_headers();
                async move {
                    self.futures
                        .get("/fapi/v2/balance", Some(&query), Some(&headers))
                        .await
                }
            })
            .await?;

        Ok(response
            .into_iter()
            .find(|b| b.asset == asset)
            .map(|b| b.available_balance)
            .unwrap_or(Decimal::ZERO))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<u64, ExchangeError> {
        let params = self.build_order_params(request)?;

        // Order placement pays both limiters; the order bucket is stricter.
        self.request_limiter.acquire().await;
        self.order_limiter.acquire().await;

        let param_refs: Vec<(&str, &str)> =
            params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        tracing::info!(
            symbol = %request.symbol,
            side = ?request.side,
            order_type = ?request.order_type,
            quantity = %request.quantity,
            price = ?request.price,
            reduce_only = request.reduce_only,
            is_spot = request.is_spot,
            "placing order"
        );

        let response: OrderResponse = self
            .with_retry("place_order", || {
                let query = self.signed_query(&param_refs);
                let headers = self.auth_headers();
                let path = Self::order_path(request.is_spot);
                let surface = self.surface(request.is_spot);
                async move { surface.post(path, Some(&query), Some(&headers)).await }
            })
            .await?;

        tracing::info!(
            order_id = response.order_id,
            status = %response.status,
            "order placed"
        );

        Ok(response.order_id)
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: u64,
        is_spot: bool,
    ) -> Result<(), ExchangeError> {
        self.request_limiter.acquire().await;
        let order_id_str = order_id.to_string();
        let params = [("symbol", symbol), ("orderId", order_id_str.as_str())];

        let response: OrderResponse = self
            .with_retry("cancel_order", || {
                let query = self.signed_query(&params);
                let headers = self.auth_headers();
                let path = Self::order_path(is_spot);
                let surface = self.surface(is_spot);
                async move { surface.delete(path, Some(&query), Some(&headers)).await }
            })
            .await?;

        tracing::info!(
            symbol = %symbol,
            order_id = response.order_id,
            status = %response.status,
            "order canceled"
        );

        Ok(())
    }

    async fn order_status(
        &self,
        symbol: &str,
        order_id: u64,
        is_spot: bool,
    ) -> Result<OrderRecord, ExchangeError> {
        self.request_limiter.acquire().await;
        let order_id_str = order_id.to_string();
        let params = [("symbol", symbol), ("orderId", order_id_str.as_str())];

        let response: OrderResponse = self
            .with_retry("order_status", || {
                let query = self.signed_query(&params);
                let headers = self.auth_headers();
                let path = Self::order_path(is_spot);
                let surface = self.surface(is_spot);
                async move { surface.get(path, Some(&query), Some(&headers)).await }
            })
            .await?;

        order_record_from_response(&response, is_spot)
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderRecord>, ExchangeError> {
        self.request_limiter.acquire().await;
        let params: Vec<(&str, &str)> = match symbol {
            Some(s) => vec![("symbol", s)],
            None => vec![],
        };

        let response: Vec<OrderResponse> = self
            .with_retry("open_orders", || {
                let query = self.signed_query(&params);
                let headers = self.auth_headers();
                async move {
                    self.futures
                        .get("/fapi/v1/openOrders", Some(&query), Some(&headers))
                        .await
                }
            })
            .await?;

        response
            .iter()
            .map(|r| order_record_from_response(r, false))
            .collect()
    }

    async fn open_positions(&self) -> Result<Vec<PositionRecord>, ExchangeError> {
        self.request_limiter.acquire().await;
        let response: Vec<PositionRiskResponse> = self
            .with_retry("open_positions", || {
                let query = self.signed_query(&[]);
                let headers = self.auth_headers();
                async move {
                    self.futures
                        .get("/fapi/v2/positionRisk", Some(&query), Some(&headers))
                        .await
                }
            })
            .await?;

        response
            .iter()
            .filter(|p| p.position_amt != Decimal::ZERO)
            .map(position_record_from_response)
            .collect()
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.request_limiter.acquire().await;
        let leverage_str = leverage.to_string();
        let params = [("symbol", symbol), ("leverage", leverage_str.as_str())];

        self.with_retry("set_leverage", || {
            let query = self.signed_query(&params);
            let headers = self.auth_headers();
            async move {
                self.futures
                    .post::<serde_json::Value>("/fapi/v1/leverage", Some(&query), Some(&headers))
                    .await
            }
        })
        .await?;

        tracing::info!(symbol = %symbol, leverage = leverage, "leverage updated");
        Ok(())
    }

    async fn set_margin_type(
        &self,
        symbol: &str,
        margin: MarginType,
    ) -> Result<(), ExchangeError> {
        self.request_limiter.acquire().await;
        let params = [("symbol", symbol), ("marginType", margin.as_wire())];

        let result = self
            .with_retry("set_margin_type", || {
                let query = self.signed_query(&params);
                let headers = self.auth_headers();
                async move {
                    self.futures
                        .post::<serde_json::Value>("/fapi/v1/marginType", Some(&query), Some(&headers))
                        .await
                }
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            // -4046: margin type already set; idempotent from the caller's view
            Err(ExchangeError::Rejected { code: -4046, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for BinanceApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceApi")
            .field("futures_base_url", &self.futures.base_url())
            .field("spot_base_url", &self.spot.base_url())
            .field("api_key", &self.credentials.api_key())
            .field("time_offset_ms", &self.time_offset_ms.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::OrderSide;
    use rust_decimal_macros::dec;

    fn api() -> BinanceApi {
        let creds = ApiCredentials::new("key".into(), "secret".into());
        BinanceApi::new(creds, BinanceApiConfig::default()).unwrap()
    }

    #[test]
    fn test_build_order_params_rejects_empty_symbol() {
        let api = api();
        let request = OrderRequest::market("", OrderSide::Buy, dec!(1));
        assert!(matches!(
            api.build_order_params(&request),
            Err(ExchangeError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_build_order_params_rejects_non_positive_qty() {
        let api = api();
        let request = OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(0));
        assert!(matches!(
            api.build_order_params(&request),
            Err(ExchangeError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_build_order_params_limit() {
        let api = api();
        let request = OrderRequest::limit("BTCUSDT", OrderSide::Buy, dec!(0.01), dec!(50000));
        let params = api.build_order_params(&request).unwrap();

        let find = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(find("symbol"), Some("BTCUSDT"));
        assert_eq!(find("side"), Some("BUY"));
        assert_eq!(find("type"), Some("LIMIT"));
        assert_eq!(find("price"), Some("50000"));
        assert_eq!(find("timeInForce"), Some("GTC"));
        assert_eq!(find("positionSide"), Some("BOTH"));
    }

    #[test]
    fn test_post_only_maps_to_gtx_on_futures() {
        let api = api();
        let mut request = OrderRequest::limit("BTCUSDT", OrderSide::Sell, dec!(0.01), dec!(50000));
        request.order_type = OrderType::PostOnly;
        let params = api.build_order_params(&request).unwrap();

        let find = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(find("type"), Some("LIMIT"));
        assert_eq!(find("timeInForce"), Some("GTX"));
    }

    #[test]
    fn test_reduce_only_flag_futures_only() {
        let api = api();
        let futures_req =
            OrderRequest::market("BTCUSDT", OrderSide::Sell, dec!(0.01)).reduce_only();
        let params = api.build_order_params(&futures_req).unwrap();
        assert!(params.iter().any(|(k, v)| k == "reduceOnly" && v == "true"));

        let spot_req = OrderRequest::market("BTCUSDT", OrderSide::Sell, dec!(0.01))
            .spot()
            .reduce_only();
        let params = api.build_order_params(&spot_req).unwrap();
        assert!(!params.iter().any(|(k, _)| k == "reduceOnly"));
    }

    #[test]
    fn test_client_order_ids_unique() {
        let api = api();
        let a = api.next_client_order_id();
        let b = api.next_client_order_id();
        assert_ne!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_surfaces_rate_limited() {
        let api = api();
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let result: Result<(), ExchangeError> = api
            .with_retry("place_order", || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(RestError::RateLimited { retry_after_ms: 1 }) }
            })
            .await;

        // Three attempts (the default), then the failure surfaces
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert!(matches!(result, Err(ExchangeError::RateLimited { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_rejection_fails_fast() {
        let api = api();
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let result: Result<(), ExchangeError> = api
            .with_retry("place_order", || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async {
                    Err(RestError::HttpError {
                        status: 400,
                        message: r#"{"code":-2010,"msg":"insufficient balance"}"#.into(),
                    })
                }
            })
            .await;

        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ExchangeError::Rejected { code: -2010, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_failure() {
        let api = api();
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let result: Result<u32, ExchangeError> = api
            .with_retry("mark_price", || {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(RestError::Timeout)
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wire_order_type_per_surface() {
        assert_eq!(wire_order_type(OrderType::PostOnly, true), "LIMIT_MAKER");
        assert_eq!(wire_order_type(OrderType::PostOnly, false), "LIMIT");
        assert_eq!(wire_order_type(OrderType::StopLimit, false), "STOP");
        assert_eq!(wire_order_type(OrderType::Market, false), "MARKET");
    }
}
