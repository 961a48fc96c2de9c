//! The request/reply surface the core requires from an exchange adapter.

use crate::error::ExchangeError;
use async_trait::async_trait;
use model::{DepthLevel, MarginType, OrderRecord, OrderRequest, PositionRecord, RecentTrade};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// Request/reply operations against one trading venue.
///
/// Each call is atomic from the caller's view; transient failures are
/// retried inside the implementation per its retry policy. The venue exposes
/// parallel spot and perpetual-futures surfaces; order routing follows the
/// request's `is_spot` flag, market-data calls take it explicitly where the
/// two books differ.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// All tradable perpetual symbols.
    async fn all_symbols(&self) -> Result<Vec<String>, ExchangeError>;

    /// Last funding rate for a perpetual, as a signed fraction.
    async fn funding_rate(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Futures mark price.
    async fn mark_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Spot last price.
    async fn spot_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Futures last traded price.
    async fn last_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Next funding settlement timestamp (ms since epoch).
    async fn next_funding_time_ms(&self, symbol: &str) -> Result<i64, ExchangeError>;

    /// 24-hour base-asset volume.
    async fn volume_24h(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Best bid and ask on the futures book.
    async fn best_bid_ask(&self, symbol: &str) -> Result<(Decimal, Decimal), ExchangeError>;

    /// Order book depth (bid side for sells, merged top levels), finite,
    /// ordered from best inward.
    async fn order_book_depth(
        &self,
        symbol: &str,
        is_spot: bool,
    ) -> Result<Vec<DepthLevel>, ExchangeError>;

    /// Public trades within the trailing `window`.
    async fn recent_trades(
        &self,
        symbol: &str,
        window: Duration,
    ) -> Result<Vec<RecentTrade>, ExchangeError>;

    /// Free balance of one asset.
    async fn balance(&self, asset: &str) -> Result<Decimal, ExchangeError>;

    /// Place an order; returns the exchange-assigned order id.
    async fn place_order(&self, request: &OrderRequest) -> Result<u64, ExchangeError>;

    /// Cancel an open order.
    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: u64,
        is_spot: bool,
    ) -> Result<(), ExchangeError>;

    /// Query one order's current record.
    async fn order_status(
        &self,
        symbol: &str,
        order_id: u64,
        is_spot: bool,
    ) -> Result<OrderRecord, ExchangeError>;

    /// Open orders, optionally filtered by symbol.
    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderRecord>, ExchangeError>;

    /// All open positions.
    async fn open_positions(&self) -> Result<Vec<PositionRecord>, ExchangeError>;

    /// Set leverage for a futures symbol.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;

    /// Set the margin mode for a futures symbol.
    async fn set_margin_type(&self, symbol: &str, margin: MarginType)
        -> Result<(), ExchangeError>;
}

/// Shared adapter handle.
pub type SharedExchangeApi = Arc<dyn ExchangeApi>;
