//! Configurable in-memory exchange used by the tests in this crate.

use async_trait::async_trait;
use exchange_core::{ExchangeApi, ExchangeError};
use model::{
    DepthLevel, MarginType, OrderRecord, OrderRequest, OrderStatus, PositionRecord, RecentTrade,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// How the mock resolves a placed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillBehavior {
    /// Orders fill completely as soon as they are placed.
    Immediate,
    /// Orders stay NEW until a test drives them.
    Manual,
    /// Placement fails with the given rejection code.
    Reject(i64),
}

#[derive(Default)]
struct MockState {
    orders: HashMap<u64, OrderRecord>,
    requests: Vec<OrderRequest>,
    canceled: Vec<u64>,
    positions: Vec<PositionRecord>,
    leverage_calls: Vec<(String, u32)>,
}

pub struct MockExchange {
    pub fill_behavior: Mutex<FillBehavior>,
    next_order_id: AtomicU64,
    state: Mutex<MockState>,
    pub mark: Mutex<Decimal>,
    pub spot: Mutex<Decimal>,
    pub balance: Mutex<Decimal>,
    pub depth: Mutex<Vec<DepthLevel>>,
    pub trades: Mutex<Vec<RecentTrade>>,
    pub funding: Mutex<Decimal>,
    pub next_funding_in_ms: Mutex<i64>,
    pub volume: Mutex<Decimal>,
    pub symbols: Mutex<Vec<String>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            fill_behavior: Mutex::new(FillBehavior::Immediate),
            next_order_id: AtomicU64::new(1),
            state: Mutex::new(MockState::default()),
            mark: Mutex::new(dec!(50050)),
            spot: Mutex::new(dec!(50000)),
            balance: Mutex::new(dec!(100000)),
            depth: Mutex::new(vec![DepthLevel::new(dec!(50000), dec!(10))]),
            trades: Mutex::new(Vec::new()),
            funding: Mutex::new(dec!(0.001)),
            next_funding_in_ms: Mutex::new(1_800_000),
            volume: Mutex::new(dec!(10000000)),
            symbols: Mutex::new(vec!["BTCUSDT".into()]),
        }
    }

    pub fn set_fill_behavior(&self, behavior: FillBehavior) {
        *self.fill_behavior.lock() = behavior;
    }

    pub fn placed_requests(&self) -> Vec<OrderRequest> {
        self.state.lock().requests.clone()
    }

    pub fn canceled_orders(&self) -> Vec<u64> {
        self.state.lock().canceled.clone()
    }

    pub fn leverage_calls(&self) -> Vec<(String, u32)> {
        self.state.lock().leverage_calls.clone()
    }

    pub fn set_positions(&self, positions: Vec<PositionRecord>) {
        self.state.lock().positions = positions;
    }

    /// Drive a manual order to a status.
    pub fn resolve_order(&self, order_id: u64, status: OrderStatus, executed: Decimal) {
        let mut state = self.state.lock();
        if let Some(record) = state.orders.get_mut(&order_id) {
            record.status = status;
            record.executed_qty = executed;
        }
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn all_symbols(&self) -> Result<Vec<String>, ExchangeError> {
        Ok(self.symbols.lock().clone())
    }

    async fn funding_rate(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(*self.funding.lock())
    }

    async fn mark_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(*self.mark.lock())
    }

    async fn spot_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(*self.spot.lock())
    }

    async fn last_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(*self.mark.lock())
    }

    async fn next_funding_time_ms(&self, _symbol: &str) -> Result<i64, ExchangeError> {
        Ok(chrono::Utc::now().timestamp_millis() + *self.next_funding_in_ms.lock())
    }

    async fn volume_24h(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(*self.volume.lock())
    }

    async fn best_bid_ask(&self, _symbol: &str) -> Result<(Decimal, Decimal), ExchangeError> {
        let mark = *self.mark.lock();
        Ok((mark - dec!(1), mark + dec!(1)))
    }

    async fn order_book_depth(
        &self,
        _symbol: &str,
        _is_spot: bool,
    ) -> Result<Vec<DepthLevel>, ExchangeError> {
        Ok(self.depth.lock().clone())
    }

    async fn recent_trades(
        &self,
        _symbol: &str,
        _window: Duration,
    ) -> Result<Vec<RecentTrade>, ExchangeError> {
        Ok(self.trades.lock().clone())
    }

    async fn balance(&self, _asset: &str) -> Result<Decimal, ExchangeError> {
        Ok(*self.balance.lock())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<u64, ExchangeError> {
        let behavior = *self.fill_behavior.lock();
        if let FillBehavior::Reject(code) = behavior {
            return Err(ExchangeError::rejected("place_order", code, "rejected"));
        }

        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut record =
            OrderRecord::from_request(request, order_id, format!("mock-{}", order_id), now_ms);

        if behavior == FillBehavior::Immediate {
            record.status = OrderStatus::Filled;
            record.executed_qty = record.original_qty;
            record.avg_fill_price = request.price.or(Some(*self.mark.lock()));
        }

        let mut state = self.state.lock();
        state.requests.push(request.clone());
        state.orders.insert(order_id, record);
        Ok(order_id)
    }

    async fn cancel_order(
        &self,
        _symbol: &str,
        order_id: u64,
        _is_spot: bool,
    ) -> Result<(), ExchangeError> {
        let mut state = self.state.lock();
        state.canceled.push(order_id);
        if let Some(record) = state.orders.get_mut(&order_id) {
            if !record.status.is_terminal() {
                record.status = OrderStatus::Canceled;
            }
        }
        Ok(())
    }

    async fn order_status(
        &self,
        _symbol: &str,
        order_id: u64,
        _is_spot: bool,
    ) -> Result<OrderRecord, ExchangeError> {
        self.state
            .lock()
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::rejected("order_status", -2013, "order does not exist"))
    }

    async fn open_orders(&self, _symbol: Option<&str>) -> Result<Vec<OrderRecord>, ExchangeError> {
        Ok(self
            .state
            .lock()
            .orders
            .values()
            .filter(|r| r.status.is_active())
            .cloned()
            .collect())
    }

    async fn open_positions(&self) -> Result<Vec<PositionRecord>, ExchangeError> {
        Ok(self.state.lock().positions.clone())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.state
            .lock()
            .leverage_calls
            .push((symbol.to_string(), leverage));
        Ok(())
    }

    async fn set_margin_type(
        &self,
        _symbol: &str,
        _margin: MarginType,
    ) -> Result<(), ExchangeError> {
        Ok(())
    }
}
