//! Order manager: placement, slicing, fill tracking, cancellation.

use dashmap::DashMap;
use exchange_core::{ExchangeError, SharedExchangeApi};
use model::{OrderRecord, OrderRequest, OrderSide, OrderStatus, OrderType};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callback invoked when a tracked order reaches a terminal status.
type OrderListener = Box<dyn Fn(&OrderRecord) + Send + Sync>;

/// Execution configuration for the order manager.
#[derive(Debug, Clone)]
pub struct OrderManagerConfig {
    /// Slippage tolerance applied to limit prices (fraction of price).
    pub price_deviation_threshold: Decimal,
    /// Promote LIMIT orders to POST_ONLY.
    pub use_post_only: bool,
    /// Default bound for `wait_for_fill`.
    pub order_timeout: Duration,
    /// Pause between sub-orders of a split placement.
    pub slice_gap: Duration,
    /// Cache poll cadence inside `wait_for_fill`.
    pub poll_interval: Duration,
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            price_deviation_threshold: Decimal::new(1, 3), // 0.001
            use_post_only: true,
            order_timeout: Duration::from_secs(30),
            slice_gap: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Result of waiting on an order.
#[derive(Debug, Clone)]
pub enum FillOutcome {
    /// The order filled completely.
    Filled(OrderRecord),
    /// The order reached a terminal non-filled status.
    Terminal(OrderRecord),
    /// The wait bound elapsed with the order still active.
    TimedOut,
}

impl FillOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, Self::Filled(_))
    }
}

/// Owns order records: places, cancels, and tracks fills.
pub struct OrderManager {
    api: SharedExchangeApi,
    config: OrderManagerConfig,
    /// Active (non-terminal) orders by exchange id.
    active: DashMap<u64, OrderRecord>,
    /// Which surface each known order went to, kept past eviction so
    /// `status` can still route fallback queries.
    surfaces: DashMap<u64, (String, bool)>,
    listeners: DashMap<u64, OrderListener>,
}

impl OrderManager {
    pub fn new(api: SharedExchangeApi, config: OrderManagerConfig) -> Self {
        Self {
            api,
            config,
            active: DashMap::new(),
            surfaces: DashMap::new(),
            listeners: DashMap::new(),
        }
    }

    /// Validate, price, and place a request; returns the exchange order id.
    ///
    /// Non-market orders get a slippage-adjusted price derived from the
    /// request's own price (or the current mark/spot price when absent),
    /// and LIMIT is promoted to POST_ONLY when configured.
    pub async fn place(&self, request: &OrderRequest) -> Result<u64, ExchangeError> {
        self.validate(request)?;
        let adjusted = self.prepare(request).await?;

        let order_id = self.api.place_order(&adjusted).await?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let record = OrderRecord::from_request(&adjusted, order_id, String::new(), now_ms);
        self.surfaces
            .insert(order_id, (adjusted.symbol.clone(), adjusted.is_spot));
        self.active.insert(order_id, record);

        debug!(order_id = order_id, symbol = %adjusted.symbol, "order cached");
        Ok(order_id)
    }

    /// Split `request` into `slices` equal sub-requests and place them
    /// sequentially, pausing `slice_gap` between placements.
    ///
    /// Returns the id of the first sub-order. If a later sub-request fails
    /// after at least one placement, prior fills are preserved and the first
    /// id is still returned; no rollback is attempted.
    pub async fn place_split(
        &self,
        request: &OrderRequest,
        slices: u32,
    ) -> Result<u64, ExchangeError> {
        self.validate(request)?;
        let slices = slices.max(1);
        let sub_requests = split_request(request, slices);

        let mut first_id = None;
        for (index, sub) in sub_requests.iter().enumerate() {
            match self.place(sub).await {
                Ok(order_id) => {
                    if first_id.is_none() {
                        first_id = Some(order_id);
                    }
                }
                Err(e) => match first_id {
                    // Nothing placed yet: surface the failure
                    None => return Err(e),
                    Some(id) => {
                        warn!(
                            symbol = %request.symbol,
                            slice = index,
                            error = %e,
                            "split placement failed mid-sequence, keeping prior fills"
                        );
                        return Ok(id);
                    }
                },
            }

            if index + 1 < sub_requests.len() {
                tokio::time::sleep(self.config.slice_gap).await;
            }
        }

        Ok(first_id.expect("at least one slice placed"))
    }

    /// Cancel an active order.
    pub async fn cancel(&self, symbol: &str, order_id: u64) -> Result<(), ExchangeError> {
        let is_spot = self
            .surfaces
            .get(&order_id)
            .map(|e| e.value().1)
            .unwrap_or(false);

        self.api.cancel_order(symbol, order_id, is_spot).await?;

        if let Some(mut record) = self.active.get_mut(&order_id) {
            record.status = OrderStatus::Canceled;
            record.updated_at_ms = chrono::Utc::now().timestamp_millis();
        }
        self.evict_if_terminal(order_id);

        Ok(())
    }

    /// Current record: cached when active, otherwise queried from the venue.
    pub async fn status(&self, symbol: &str, order_id: u64) -> Result<OrderRecord, ExchangeError> {
        if let Some(record) = self.active.get(&order_id) {
            return Ok(record.clone());
        }

        let is_spot = self
            .surfaces
            .get(&order_id)
            .map(|e| e.value().1)
            .unwrap_or(false);
        self.api.order_status(symbol, order_id, is_spot).await
    }

    /// Block until the order fills, reaches a terminal status, or `timeout`
    /// elapses.
    ///
    /// Polls the venue directly while waiting (the stream may lag) and
    /// feeds each answer back through the update path so the cache stays
    /// consistent with what the caller observed.
    pub async fn wait_for_fill(
        &self,
        symbol: &str,
        order_id: u64,
        timeout: Duration,
    ) -> Result<FillOutcome, ExchangeError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let is_spot = self
            .surfaces
            .get(&order_id)
            .map(|e| e.value().1)
            .unwrap_or(false);

        loop {
            let record = self.api.order_status(symbol, order_id, is_spot).await?;
            self.handle_order_update(&record);

            if record.is_filled() {
                return Ok(FillOutcome::Filled(record));
            }
            if record.is_terminal() {
                return Ok(FillOutcome::Terminal(record));
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(order_id = order_id, "wait_for_fill timed out");
                return Ok(FillOutcome::TimedOut);
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Apply an ORDER_UPDATE stream event to the cached record.
    ///
    /// Updates for one order id arrive in the exchange's order; a terminal
    /// update evicts the record and fires the registered listener.
    pub fn handle_order_update(&self, update: &OrderRecord) {
        if update.executed_qty < Decimal::ZERO || update.executed_qty > update.original_qty {
            warn!(
                order_id = update.order_id,
                executed = %update.executed_qty,
                original = %update.original_qty,
                "dropping order update violating fill bounds"
            );
            return;
        }

        match self.active.get_mut(&update.order_id) {
            Some(mut record) => {
                if !record.status.can_transition_to(update.status) && record.status != update.status
                {
                    debug!(
                        order_id = update.order_id,
                        from = ?record.status,
                        to = ?update.status,
                        "ignoring out-of-dag status transition"
                    );
                    return;
                }
                *record = update.clone();
            }
            None => {
                // First sight of an order placed elsewhere (e.g. reconnect gap)
                if !update.status.is_terminal() {
                    self.active.insert(update.order_id, update.clone());
                    self.surfaces.insert(
                        update.order_id,
                        (update.symbol.clone(), update.is_spot),
                    );
                }
            }
        }

        self.evict_if_terminal(update.order_id);
    }

    /// Register a callback fired once when `order_id` goes terminal.
    pub fn register_listener<F>(&self, order_id: u64, listener: F)
    where
        F: Fn(&OrderRecord) + Send + Sync + 'static,
    {
        self.listeners.insert(order_id, Box::new(listener));
    }

    /// Snapshot of all active order records.
    pub fn active_orders(&self) -> Vec<OrderRecord> {
        self.active.iter().map(|e| e.value().clone()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    fn evict_if_terminal(&self, order_id: u64) {
        let terminal = self
            .active
            .get(&order_id)
            .map(|r| r.is_terminal())
            .unwrap_or(false);
        if !terminal {
            return;
        }

        if let Some((_, record)) = self.active.remove(&order_id) {
            info!(
                order_id = order_id,
                symbol = %record.symbol,
                status = ?record.status,
                executed = %record.executed_qty,
                "order terminal, evicted from active index"
            );
            if let Some((_, listener)) = self.listeners.remove(&order_id) {
                listener(&record);
            }
        }
    }

    fn validate(&self, request: &OrderRequest) -> Result<(), ExchangeError> {
        if request.symbol.is_empty() {
            return Err(ExchangeError::InvalidRequest("empty symbol".into()));
        }
        if request.quantity <= Decimal::ZERO {
            return Err(ExchangeError::InvalidRequest(format!(
                "quantity must be positive, got {}",
                request.quantity
            )));
        }
        if request.order_type != OrderType::Market {
            match request.price {
                Some(p) if p > Decimal::ZERO => {}
                _ => {
                    return Err(ExchangeError::InvalidRequest(format!(
                        "{:?} order requires a positive price",
                        request.order_type
                    )))
                }
            }
        }
        Ok(())
    }

    async fn prepare(&self, request: &OrderRequest) -> Result<OrderRequest, ExchangeError> {
        let mut adjusted = request.clone();

        if adjusted.order_type == OrderType::Market {
            return Ok(adjusted);
        }

        let reference = match adjusted.price {
            Some(p) if p > Decimal::ZERO => p,
            _ => {
                if adjusted.is_spot {
                    self.api.spot_price(&adjusted.symbol).await?
                } else {
                    self.api.mark_price(&adjusted.symbol).await?
                }
            }
        };

        adjusted.price = Some(self.slippage_price(adjusted.side, reference));

        if self.config.use_post_only && adjusted.order_type == OrderType::Limit {
            adjusted.order_type = OrderType::PostOnly;
        }

        Ok(adjusted)
    }

    /// Buy orders pay up to `p * (1 + delta)`, sells accept down to
    /// `p * (1 - delta)`.
    fn slippage_price(&self, side: OrderSide, reference: Decimal) -> Decimal {
        let delta = self.config.price_deviation_threshold;
        match side {
            OrderSide::Buy => reference * (Decimal::ONE + delta),
            OrderSide::Sell => reference * (Decimal::ONE - delta),
        }
    }
}

/// Split a request into `slices` equal sub-requests.
fn split_request(request: &OrderRequest, slices: u32) -> Vec<OrderRequest> {
    let slices_dec = Decimal::from_u32(slices).unwrap_or(Decimal::ONE);
    let per_slice = request.quantity / slices_dec;

    (0..slices)
        .map(|i| {
            let mut sub = request.clone();
            // Last slice absorbs the rounding residue
            sub.quantity = if i + 1 == slices {
                request.quantity - per_slice * Decimal::from_u32(i).unwrap_or_default()
            } else {
                per_slice
            };
            sub
        })
        .collect()
}

/// Shared order manager handle.
pub type SharedOrderManager = Arc<OrderManager>;
