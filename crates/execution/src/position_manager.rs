//! Position manager: aggregated position view and lifecycle operations.

use crate::order_manager::SharedOrderManager;
use dashmap::DashMap;
use exchange_core::{ExchangeError, SharedExchangeApi};
use model::{MarginType, OrderRequest, OrderSide, PositionRecord};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

/// Options applied when opening a position.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Leverage to set before opening (futures only).
    pub leverage: Option<u32>,
    /// Margin mode to set before opening (futures only).
    pub margin_type: Option<MarginType>,
    /// Route the order to the spot surface.
    pub is_spot: bool,
}

/// Owns the symbol -> position mapping, refreshed from POSITION_UPDATE
/// events and on each control tick. Open/close/adjust are idempotent with
/// respect to end state.
pub struct PositionManager {
    api: SharedExchangeApi,
    orders: SharedOrderManager,
    positions: DashMap<String, PositionRecord>,
}

impl PositionManager {
    pub fn new(api: SharedExchangeApi, orders: SharedOrderManager) -> Self {
        Self {
            api,
            orders,
            positions: DashMap::new(),
        }
    }

    /// Re-read all open positions from the venue.
    pub async fn refresh(&self) -> Result<(), ExchangeError> {
        let records = self.api.open_positions().await?;

        self.positions.clear();
        for record in records {
            self.positions.insert(record.symbol.clone(), record);
        }

        debug!(count = self.positions.len(), "positions refreshed");
        Ok(())
    }

    /// Apply a POSITION_UPDATE stream event.
    pub fn handle_position_update(&self, record: &PositionRecord) {
        if record.is_flat() {
            self.positions.remove(&record.symbol);
        } else {
            self.positions.insert(record.symbol.clone(), record.clone());
        }
    }

    /// Current record for a symbol, if any.
    pub fn get(&self, symbol: &str) -> Option<PositionRecord> {
        self.positions.get(symbol).map(|p| p.clone())
    }

    /// Signed size for a symbol (zero when flat).
    pub fn size(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.size)
            .unwrap_or(Decimal::ZERO)
    }

    /// All current position records.
    pub fn all(&self) -> Vec<PositionRecord> {
        self.positions.iter().map(|p| p.clone()).collect()
    }

    /// Sum of absolute notional across all positions.
    pub fn total_exposure(&self) -> Decimal {
        self.positions.iter().map(|p| p.notional()).sum()
    }

    /// Sum of absolute sizes across all positions except `excluded`.
    pub fn total_size_excluding(&self, excluded: &str) -> Decimal {
        self.positions
            .iter()
            .filter(|p| p.key() != excluded)
            .map(|p| p.abs_size())
            .sum()
    }

    /// Open a position of `size` on `side`, applying the options first.
    pub async fn open(
        &self,
        symbol: &str,
        size: Decimal,
        side: OrderSide,
        options: &OpenOptions,
    ) -> Result<u64, ExchangeError> {
        if !options.is_spot {
            if let Some(margin_type) = options.margin_type {
                self.api.set_margin_type(symbol, margin_type).await?;
            }
            if let Some(leverage) = options.leverage {
                self.api.set_leverage(symbol, leverage).await?;
            }
        }

        let mut request = OrderRequest::market(symbol, side, size);
        request.is_spot = options.is_spot;

        info!(symbol = %symbol, side = ?side, size = %size, is_spot = options.is_spot, "opening position");
        self.orders.place(&request).await
    }

    /// Close a symbol's position with a reduce-only order sized to the
    /// current absolute size. A no-op when already flat.
    pub async fn close(&self, symbol: &str) -> Result<Option<u64>, ExchangeError> {
        let Some(position) = self.get(symbol) else {
            debug!(symbol = %symbol, "close requested on flat symbol, nothing to do");
            return Ok(None);
        };
        if position.is_flat() {
            return Ok(None);
        }

        let side = if position.is_long() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let request =
            OrderRequest::market(symbol, side, position.abs_size()).reduce_only();

        info!(symbol = %symbol, size = %position.size, "closing position");
        let order_id = self.orders.place(&request).await?;
        Ok(Some(order_id))
    }

    /// Close every open position. Calling again once flat is a no-op.
    pub async fn close_all(&self) -> Result<usize, ExchangeError> {
        let symbols: Vec<String> = self.positions.iter().map(|p| p.key().clone()).collect();

        let mut closed = 0;
        for symbol in symbols {
            if self.close(&symbol).await?.is_some() {
                closed += 1;
            }
        }

        info!(closed = closed, "close_all complete");
        Ok(closed)
    }

    /// Move a symbol's position to `target_size` by placing one order for
    /// the signed difference. Reducing moves are flagged reduce-only.
    pub async fn adjust(
        &self,
        symbol: &str,
        target_size: Decimal,
    ) -> Result<Option<u64>, ExchangeError> {
        let current = self.size(symbol);
        let delta = target_size - current;

        if delta == Decimal::ZERO {
            return Ok(None);
        }

        let side = if delta > Decimal::ZERO {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };

        // Moving toward zero (without crossing) only ever reduces
        let reducing = target_size.abs() < current.abs()
            && (target_size == Decimal::ZERO || target_size.signum() == current.signum());

        let mut request = OrderRequest::market(symbol, side, delta.abs());
        if reducing {
            request = request.reduce_only();
        }

        info!(
            symbol = %symbol,
            current = %current,
            target = %target_size,
            delta = %delta,
            "adjusting position"
        );
        let order_id = self.orders.place(&request).await?;
        Ok(Some(order_id))
    }

    /// Set leverage for a symbol.
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.api.set_leverage(symbol, leverage).await?;
        if let Some(mut position) = self.positions.get_mut(symbol) {
            position.leverage = leverage;
        }
        Ok(())
    }
}

/// Shared position manager handle.
pub type SharedPositionManager = Arc<PositionManager>;
