//! The funding-arbitrage control loop.

use crate::params::FundingArbParams;
use exchange_core::{ExchangeError, SharedExchangeApi};
use execution::{FillOutcome, SharedOrderManager, SharedPositionManager};
use marketdata::MarketDataCache;
use model::{InstrumentSnapshot, OrderRequest, OrderSide, PairState};
use parking_lot::Mutex;
use risk::SharedRiskController;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Pause after a failed tick before the next one.
const TICK_ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// Pause between TWAP slices.
const TWAP_SLICE_GAP: Duration = Duration::from_secs(2);
/// Leg residue below this is treated as flat when unwinding.
const DUST_SIZE: Decimal = dec!(0.0001);
/// Required depth coverage relative to target notional.
const LIQUIDITY_COVERAGE: Decimal = dec!(3);
/// An order may not exceed this multiple of the mean recent trade size.
const MARKET_IMPACT_MULTIPLE: Decimal = dec!(3);

struct EngineState {
    pairs: HashMap<String, PairState>,
    active_instruments: Vec<InstrumentSnapshot>,
    in_window: bool,
    total_equity: Decimal,
    total_pnl: Decimal,
}

/// Read-only view of the engine for observers.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub in_window: bool,
    pub open_pairs: usize,
    pub total_equity: Decimal,
    pub total_pnl: Decimal,
}

/// Outcome of one TWAP leg.
struct LegResult {
    filled: Decimal,
    complete: bool,
}

/// Periodically pairs a spot position against an offsetting perpetual
/// position across funding settlements.
///
/// The engine exclusively owns pair state; its lock is taken first in the
/// system lock order and is never held across an await.
pub struct FundingArbEngine {
    params: FundingArbParams,
    api: SharedExchangeApi,
    cache: Arc<MarketDataCache>,
    orders: SharedOrderManager,
    positions: SharedPositionManager,
    risk: SharedRiskController,
    state: Mutex<EngineState>,
}

impl FundingArbEngine {
    pub fn new(
        params: FundingArbParams,
        api: SharedExchangeApi,
        cache: Arc<MarketDataCache>,
        orders: SharedOrderManager,
        positions: SharedPositionManager,
        risk: SharedRiskController,
    ) -> Self {
        Self {
            params,
            api,
            cache,
            orders,
            positions,
            risk,
            state: Mutex::new(EngineState {
                pairs: HashMap::new(),
                active_instruments: Vec::new(),
                in_window: false,
                total_equity: Decimal::ZERO,
                total_pnl: Decimal::ZERO,
            }),
        }
    }

    /// Run the control loop until shutdown.
    ///
    /// Tick failures are logged and absorbed with a short backoff; an
    /// invariant violation attempts an orderly unwind and terminates.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), ExchangeError> {
        info!(
            tick_secs = self.params.tick_interval.as_secs(),
            top_n = self.params.top_n_instruments,
            "funding arbitrage engine starting"
        );

        let mut interval = tokio::time::interval(self.params.tick_interval);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("shutdown signal received, stopping engine");
                        return Ok(());
                    }
                }

                _ = interval.tick() => {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    if let Err(e) = self.tick(now_ms).await {
                        if e.is_fatal() {
                            error!(error = %e, "invariant violated, attempting orderly shutdown");
                            if let Err(close_err) = self.close_all_positions().await {
                                error!(error = %close_err, "orderly shutdown failed");
                            }
                            return Err(e);
                        }

                        error!(error = %e, "tick failed, backing off");
                        tokio::time::sleep(TICK_ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }

    /// One control tick: refresh state, then trade or monitor.
    pub async fn tick(&self, now_ms: i64) -> Result<(), ExchangeError> {
        self.update_state(now_ms).await?;

        let (in_window, instruments, equity) = {
            let state = self.state.lock();
            (
                state.in_window,
                state.active_instruments.clone(),
                state.total_equity,
            )
        };

        if in_window {
            for snapshot in instruments {
                if !snapshot.in_funding_window(now_ms, self.params.pre_funding_minutes) {
                    continue;
                }
                if self.state.lock().pairs.contains_key(&snapshot.symbol) {
                    continue;
                }

                if let Err(e) = self.try_open_pair(&snapshot, equity, now_ms).await {
                    warn!(symbol = %snapshot.symbol, error = %e, "pair open attempt failed");
                }
            }
        } else {
            self.monitor_positions(now_ms).await?;
        }

        Ok(())
    }

    async fn try_open_pair(
        &self,
        snapshot: &InstrumentSnapshot,
        equity: Decimal,
        now_ms: i64,
    ) -> Result<(), ExchangeError> {
        if !self.validate_instrument(snapshot).await? {
            return Ok(());
        }

        let size = self.calculate_size(snapshot, equity).await?;
        if size == Decimal::ZERO {
            debug!(symbol = %snapshot.symbol, "sized to zero, skipping");
            return Ok(());
        }

        if !self
            .risk
            .approve_new_position(&snapshot.symbol, size, snapshot.funding_rate)
        {
            warn!(symbol = %snapshot.symbol, size = %size, "vetoed by risk controller");
            return Ok(());
        }

        self.execute_pair_trade(snapshot, size, now_ms).await
    }

    // ------------------------------------------------------------------
    // State refresh
    // ------------------------------------------------------------------

    async fn update_state(&self, now_ms: i64) -> Result<(), ExchangeError> {
        self.positions.refresh().await?;

        let equity = self.api.balance(&self.params.quote_asset).await?;
        self.risk.update_balance(equity);

        let instruments = self.select_instruments(now_ms).await?;
        let in_window = instruments
            .iter()
            .any(|s| s.in_funding_window(now_ms, self.params.pre_funding_minutes));

        for snapshot in &instruments {
            self.risk
                .observe_price(&snapshot.symbol, snapshot.spot_price);
        }

        let total_pnl = self.compute_total_pnl(&instruments, now_ms).await;
        self.risk.record_pnl(total_pnl, now_ms).await;

        let mut state = self.state.lock();
        state.active_instruments = instruments;
        state.in_window = in_window;
        state.total_equity = equity;
        state.total_pnl = total_pnl;

        Ok(())
    }

    /// Build snapshots for every tradable symbol, keep the `top_n` by
    /// |funding rate| (ties broken lexicographically by symbol).
    async fn select_instruments(
        &self,
        now_ms: i64,
    ) -> Result<Vec<InstrumentSnapshot>, ExchangeError> {
        let symbols = self.api.all_symbols().await?;

        let mut instruments = Vec::new();
        for symbol in symbols {
            match self.build_snapshot(&symbol, now_ms).await {
                Ok(snapshot) => instruments.push(snapshot),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "snapshot failed, skipping symbol");
                }
            }
        }

        instruments.sort_by(|a, b| {
            b.funding_rate
                .abs()
                .cmp(&a.funding_rate.abs())
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        instruments.truncate(self.params.top_n_instruments);

        Ok(instruments)
    }

    async fn build_snapshot(
        &self,
        symbol: &str,
        now_ms: i64,
    ) -> Result<InstrumentSnapshot, ExchangeError> {
        if let Some(snapshot) = self.cache.snapshot(symbol, self.liquidity_score_cached(symbol, now_ms), now_ms) {
            return Ok(snapshot);
        }

        let spot_price = self.api.spot_price(symbol).await?;
        let futures_price = self.api.mark_price(symbol).await?;
        let funding_rate = self.api.funding_rate(symbol).await?;
        let next_funding_time_ms = self.api.next_funding_time_ms(symbol).await?;
        let volume_24h = self.api.volume_24h(symbol).await?;
        let (bid, ask) = self.api.best_bid_ask(symbol).await?;

        self.cache.put_spot_price(symbol, spot_price, now_ms);
        self.cache.put_mark_price(symbol, futures_price, now_ms);
        self.cache.put_funding_rate(symbol, funding_rate, now_ms);
        self.cache
            .put_next_funding_time(symbol, next_funding_time_ms, now_ms);
        self.cache.put_volume_24h(symbol, volume_24h, now_ms);
        self.cache.put_best_bid_ask(symbol, bid, ask, now_ms);

        let spread = ask - bid;
        let score = self.liquidity_score(volume_24h * spot_price, spread, spot_price);

        Ok(InstrumentSnapshot::new(
            symbol,
            spot_price,
            futures_price,
            funding_rate,
            next_funding_time_ms,
            volume_24h,
            spread,
            score,
        ))
    }

    fn liquidity_score_cached(&self, symbol: &str, now_ms: i64) -> Decimal {
        let volume = self.cache.volume_24h(symbol, now_ms).unwrap_or(Decimal::ZERO);
        let spot = self.cache.spot_price(symbol, now_ms).unwrap_or(Decimal::ZERO);
        let spread = self
            .cache
            .best_bid_ask(symbol, now_ms)
            .map(|(b, a)| a - b)
            .unwrap_or(Decimal::ZERO);
        self.liquidity_score(volume * spot, spread, spot)
    }

    /// Combine volume depth and spread tightness into [0, 1].
    fn liquidity_score(&self, volume_usd: Decimal, spread: Decimal, spot_price: Decimal) -> Decimal {
        if spot_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let volume_floor = self.params.min_volume_usd * dec!(10);
        let volume_part = if volume_floor > Decimal::ZERO {
            (volume_usd / volume_floor).min(Decimal::ONE)
        } else {
            Decimal::ONE
        };

        let spread_ratio = spread / spot_price;
        let spread_part = if self.params.max_spread_ratio > Decimal::ZERO {
            (Decimal::ONE - spread_ratio / self.params.max_spread_ratio).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        (volume_part + spread_part) / dec!(2)
    }

    async fn compute_total_pnl(
        &self,
        instruments: &[InstrumentSnapshot],
        _now_ms: i64,
    ) -> Decimal {
        let pairs: Vec<PairState> = self.state.lock().pairs.values().cloned().collect();

        let mut total = Decimal::ZERO;
        for pair in pairs {
            let prices = match instruments.iter().find(|s| s.symbol == pair.symbol) {
                Some(snapshot) => Some((snapshot.spot_price, snapshot.futures_price)),
                None => {
                    let spot = self.api.spot_price(&pair.symbol).await;
                    let mark = self.api.mark_price(&pair.symbol).await;
                    match (spot, mark) {
                        (Ok(s), Ok(m)) => Some((s, m)),
                        _ => None,
                    }
                }
            };

            if let Some((spot, futures)) = prices {
                total += pair.unrealized_pnl(spot, futures);
            }
        }

        total
    }

    // ------------------------------------------------------------------
    // Validation and sizing
    // ------------------------------------------------------------------

    /// Conjunctive instrument checks; every rejection is logged with the
    /// failing quantity.
    async fn validate_instrument(
        &self,
        snapshot: &InstrumentSnapshot,
    ) -> Result<bool, ExchangeError> {
        let symbol = &snapshot.symbol;

        if snapshot.funding_rate.abs() < self.params.min_funding_rate {
            debug!(symbol = %symbol, funding_rate = %snapshot.funding_rate, "funding rate too low");
            return Ok(false);
        }

        if snapshot.basis.abs() < self.params.min_basis_ratio {
            debug!(symbol = %symbol, basis = %snapshot.basis, "basis too low");
            return Ok(false);
        }

        if snapshot.liquidity_score < self.params.min_liquidity_score {
            debug!(symbol = %symbol, score = %snapshot.liquidity_score, "liquidity score too low");
            return Ok(false);
        }

        if snapshot.spot_price <= Decimal::ZERO {
            return Ok(false);
        }
        let spread_ratio = snapshot.bid_ask_spread / snapshot.spot_price;
        if spread_ratio > self.params.max_spread_ratio {
            debug!(symbol = %symbol, spread_ratio = %spread_ratio, "spread too wide");
            return Ok(false);
        }

        let volume_usd = snapshot.volume_24h * snapshot.spot_price;
        if volume_usd < self.params.min_volume_usd {
            debug!(symbol = %symbol, volume_usd = %volume_usd, "volume too low");
            return Ok(false);
        }

        if !self.check_liquidity(symbol).await? {
            debug!(symbol = %symbol, "order book depth insufficient");
            return Ok(false);
        }

        Ok(true)
    }

    /// Both books must cover `LIQUIDITY_COVERAGE` times the target notional
    /// within their displayed levels.
    async fn check_liquidity(&self, symbol: &str) -> Result<bool, ExchangeError> {
        let target = self.params.position_size_usd * LIQUIDITY_COVERAGE;

        let spot_depth = self.depth_notional(symbol, true, target).await?;
        if spot_depth < target {
            return Ok(false);
        }

        let futures_depth = self.depth_notional(symbol, false, target).await?;
        Ok(futures_depth >= target)
    }

    /// Sum level notionals from best inward until `target` is covered.
    async fn depth_notional(
        &self,
        symbol: &str,
        is_spot: bool,
        target: Decimal,
    ) -> Result<Decimal, ExchangeError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let levels = match self.cache.depth(symbol, is_spot, now_ms) {
            Some(levels) => levels,
            None => {
                let levels = self.api.order_book_depth(symbol, is_spot).await?;
                self.cache.put_depth(symbol, is_spot, levels.clone(), now_ms);
                levels
            }
        };

        let mut sum = Decimal::ZERO;
        for level in levels {
            sum += level.notional();
            if sum >= target {
                break;
            }
        }
        Ok(sum)
    }

    /// Mean trade size over the impact window; the proposed size may not
    /// exceed three times it.
    async fn check_market_impact(
        &self,
        symbol: &str,
        size: Decimal,
    ) -> Result<bool, ExchangeError> {
        let window = Duration::from_secs(self.params.min_market_impact_minutes as u64 * 60);
        let trades = self.api.recent_trades(symbol, window).await?;

        if trades.is_empty() {
            return Ok(false);
        }

        let total: Decimal = trades.iter().map(|t| t.qty).sum();
        let mean = total / Decimal::from(trades.len());

        Ok(size <= mean * MARKET_IMPACT_MULTIPLE)
    }

    /// The sizing ladder: base notional, clamped by displayed liquidity and
    /// the per-symbol equity cap, then halved until the market-impact check
    /// passes. Sizes below 10% of base or under the minimum notional are
    /// discarded.
    async fn calculate_size(
        &self,
        snapshot: &InstrumentSnapshot,
        total_equity: Decimal,
    ) -> Result<Decimal, ExchangeError> {
        if snapshot.spot_price <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        let base = self.params.position_size_usd / snapshot.spot_price;

        let target = self.params.position_size_usd * LIQUIDITY_COVERAGE;
        let spot_depth = self.depth_notional(&snapshot.symbol, true, target).await?;
        let futures_depth = self.depth_notional(&snapshot.symbol, false, target).await?;
        let liquidity_max =
            spot_depth.min(futures_depth) / (LIQUIDITY_COVERAGE * snapshot.spot_price);

        let equity_max =
            self.params.max_position_per_symbol * total_equity / snapshot.spot_price;

        let mut size = base.min(liquidity_max).min(equity_max);

        if !self.check_market_impact(&snapshot.symbol, size).await? {
            let mut reduced = size * dec!(0.5);
            while reduced > base * dec!(0.1)
                && !self.check_market_impact(&snapshot.symbol, reduced).await?
            {
                reduced *= dec!(0.5);
            }
            size = reduced;
        }

        if size * snapshot.spot_price < self.params.min_notional_usd {
            return Ok(Decimal::ZERO);
        }

        Ok(size)
    }

    // ------------------------------------------------------------------
    // Pair execution
    // ------------------------------------------------------------------

    /// Open both legs concurrently, record the pair, then rebalance.
    async fn execute_pair_trade(
        &self,
        snapshot: &InstrumentSnapshot,
        size: Decimal,
        now_ms: i64,
    ) -> Result<(), ExchangeError> {
        let symbol = &snapshot.symbol;
        let notional = size * snapshot.spot_price;

        let estimated_profit = snapshot.basis.abs() * notional;
        let total_fees = dec!(2) * self.params.trading_fee * notional;
        if estimated_profit <= total_fees {
            debug!(
                symbol = %symbol,
                profit = %estimated_profit,
                fees = %total_fees,
                "basis profit does not clear round-trip fees"
            );
            return Ok(());
        }

        // Positive basis: futures rich, so buy spot and short futures.
        let long_spot = snapshot.futures_price > snapshot.spot_price;

        info!(
            symbol = %symbol,
            size = %size,
            basis = %snapshot.basis,
            long_spot = long_spot,
            "executing pair trade"
        );

        let abort = AtomicBool::new(false);
        let (spot_result, futures_result) = tokio::join!(
            self.execute_leg(symbol, size, true, long_spot, &abort),
            self.execute_leg(symbol, size, false, !long_spot, &abort),
        );

        let spot_signed = signed(spot_result.filled, long_spot);
        let futures_signed = signed(futures_result.filled, !long_spot);

        if spot_result.filled == Decimal::ZERO && futures_result.filled == Decimal::ZERO {
            warn!(symbol = %symbol, "neither leg filled, nothing to record");
            return Ok(());
        }

        {
            let mut state = self.state.lock();
            state.pairs.insert(
                symbol.clone(),
                PairState {
                    symbol: symbol.clone(),
                    spot_size: spot_signed,
                    futures_size: futures_signed,
                    entry_basis: snapshot.basis,
                    entry_spot_price: snapshot.spot_price,
                    entry_futures_price: snapshot.futures_price,
                    opened_at_ms: now_ms,
                    target_funding_time_ms: snapshot.next_funding_time_ms,
                },
            );
        }

        self.risk.record_trade(now_ms);

        if !spot_result.complete || !futures_result.complete {
            warn!(
                symbol = %symbol,
                spot_filled = %spot_result.filled,
                futures_filled = %futures_result.filled,
                "pair legs asymmetric after timeout, rebalancing"
            );
        }
        self.rebalance(symbol).await?;

        info!(symbol = %symbol, "pair trade complete");
        Ok(())
    }

    /// Execute one leg as `twap_intervals` equal slices, two seconds apart.
    ///
    /// A slice that fails to fill within the execution timeout is cancelled,
    /// the shared abort flag stops the sibling leg's remaining slices, and
    /// whatever filled stays (rebalancing resolves the asymmetry).
    async fn execute_leg(
        &self,
        symbol: &str,
        total_size: Decimal,
        is_spot: bool,
        is_buy: bool,
        abort: &AtomicBool,
    ) -> LegResult {
        let intervals = if self.params.use_twap {
            self.params.twap_intervals.max(1)
        } else {
            1
        };
        let per_slice = total_size / Decimal::from(intervals);
        let side = if is_buy { OrderSide::Buy } else { OrderSide::Sell };

        let mut filled = Decimal::ZERO;

        for slice_index in 0..intervals {
            if abort.load(Ordering::Relaxed) {
                debug!(symbol = %symbol, is_spot = is_spot, "sibling leg aborted, stopping slices");
                return LegResult {
                    filled,
                    complete: false,
                };
            }

            // Last slice absorbs the division residue
            let qty = if slice_index + 1 == intervals {
                total_size - per_slice * Decimal::from(intervals - 1)
            } else {
                per_slice
            };

            let reference = match self.reference_price(symbol, is_spot).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "no reference price for slice");
                    abort.store(true, Ordering::Relaxed);
                    return LegResult {
                        filled,
                        complete: false,
                    };
                }
            };

            let mut request = OrderRequest::limit(symbol, side, qty, reference);
            request.is_spot = is_spot;

            let order_id = match self.orders.place(&request).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(symbol = %symbol, slice = slice_index, error = %e, "slice placement failed");
                    abort.store(true, Ordering::Relaxed);
                    return LegResult {
                        filled,
                        complete: false,
                    };
                }
            };

            match self
                .orders
                .wait_for_fill(symbol, order_id, self.params.execution_timeout)
                .await
            {
                Ok(FillOutcome::Filled(record)) => {
                    filled += record.executed_qty;
                }
                Ok(FillOutcome::Terminal(record)) => {
                    warn!(symbol = %symbol, status = ?record.status, "slice ended unfilled");
                    filled += record.executed_qty;
                    abort.store(true, Ordering::Relaxed);
                    return LegResult {
                        filled,
                        complete: false,
                    };
                }
                Ok(FillOutcome::TimedOut) | Err(_) => {
                    if let Err(e) = self.orders.cancel(symbol, order_id).await {
                        warn!(symbol = %symbol, order_id = order_id, error = %e, "slice cancel failed");
                    }
                    if let Ok(record) = self.orders.status(symbol, order_id).await {
                        filled += record.executed_qty;
                    }
                    abort.store(true, Ordering::Relaxed);
                    return LegResult {
                        filled,
                        complete: false,
                    };
                }
            }

            if slice_index + 1 < intervals {
                tokio::time::sleep(TWAP_SLICE_GAP).await;
            }
        }

        LegResult {
            filled,
            complete: true,
        }
    }

    async fn reference_price(
        &self,
        symbol: &str,
        is_spot: bool,
    ) -> Result<Decimal, ExchangeError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        if is_spot {
            if let Some(price) = self.cache.spot_price(symbol, now_ms) {
                return Ok(price);
            }
            self.api.spot_price(symbol).await
        } else {
            if let Some(price) = self.cache.mark_price(symbol, now_ms) {
                return Ok(price);
            }
            self.api.mark_price(symbol).await
        }
    }

    // ------------------------------------------------------------------
    // Rebalancing
    // ------------------------------------------------------------------

    /// Net the legs back to within tolerance by trading half the imbalance
    /// on the over-weighted side. Never triggers further rebalancing.
    pub async fn rebalance(&self, symbol: &str) -> Result<(), ExchangeError> {
        let Some(pair) = self.state.lock().pairs.get(symbol).cloned() else {
            return Ok(());
        };

        let imbalance = pair.imbalance();
        if imbalance <= self.params.position_imbalance_tolerance {
            return Ok(());
        }

        warn!(symbol = %symbol, imbalance = %imbalance, "leg imbalance above tolerance");

        let adjustment = imbalance / dec!(2);
        let spot_overweight = pair.spot_size > -pair.futures_size;

        let request = if spot_overweight {
            // Shed spot exposure
            OrderRequest::market(symbol, OrderSide::Sell, adjustment)
                .spot()
                .reduce_only()
        } else {
            // Shed short futures exposure
            OrderRequest::market(symbol, OrderSide::Buy, adjustment).reduce_only()
        };

        self.orders.place(&request).await?;

        let mut state = self.state.lock();
        if let Some(pair) = state.pairs.get_mut(symbol) {
            if spot_overweight {
                pair.spot_size -= adjustment;
            } else {
                pair.futures_size += adjustment;
            }
            info!(
                symbol = %symbol,
                spot = %pair.spot_size,
                futures = %pair.futures_size,
                "pair rebalanced"
            );
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Monitoring and unwinding
    // ------------------------------------------------------------------

    /// Outside the window: close pairs whose funding settled or whose PnL
    /// crossed the take-profit / stop-loss bounds.
    async fn monitor_positions(&self, now_ms: i64) -> Result<(), ExchangeError> {
        let pairs: Vec<PairState> = self.state.lock().pairs.values().cloned().collect();

        for pair in pairs {
            let symbol = pair.symbol.clone();

            let funding_settled = now_ms > pair.target_funding_time_ms;

            let pnl_ratio = match (
                self.reference_price(&symbol, true).await,
                self.reference_price(&symbol, false).await,
            ) {
                (Ok(spot), Ok(futures)) => {
                    pair.unrealized_pnl(spot, futures) / self.params.position_size_usd
                }
                _ => Decimal::ZERO,
            };

            let take_profit = pnl_ratio >= self.params.profit_take_ratio;
            let stop_loss = pnl_ratio <= -self.params.stop_loss_ratio;

            if funding_settled || take_profit || stop_loss {
                info!(
                    symbol = %symbol,
                    funding_settled = funding_settled,
                    pnl_ratio = %pnl_ratio,
                    "closing pair"
                );
                if let Err(e) = self.close_pair(&symbol, now_ms).await {
                    warn!(symbol = %symbol, error = %e, "pair close failed");
                }
            }
        }

        Ok(())
    }

    /// Unwind both legs with reduce-only orders sized to the current leg
    /// sizes, then drop the pair entry.
    async fn close_pair(&self, symbol: &str, now_ms: i64) -> Result<(), ExchangeError> {
        let Some(pair) = self.state.lock().pairs.get(symbol).cloned() else {
            return Ok(());
        };

        let abort = AtomicBool::new(false);

        if pair.spot_size.abs() > DUST_SIZE {
            let is_buy = pair.spot_size < Decimal::ZERO;
            self.close_leg(symbol, pair.spot_size.abs(), true, is_buy, &abort)
                .await;
        }
        if pair.futures_size.abs() > DUST_SIZE {
            let is_buy = pair.futures_size < Decimal::ZERO;
            self.close_leg(symbol, pair.futures_size.abs(), false, is_buy, &abort)
                .await;
        }

        self.state.lock().pairs.remove(symbol);
        self.risk.record_trade(now_ms);

        info!(symbol = %symbol, "pair closed");
        Ok(())
    }

    async fn close_leg(
        &self,
        symbol: &str,
        size: Decimal,
        is_spot: bool,
        is_buy: bool,
        abort: &AtomicBool,
    ) {
        if self.params.use_twap {
            let result = self
                .execute_reduce_leg(symbol, size, is_spot, is_buy, abort)
                .await;
            if !result.complete {
                warn!(symbol = %symbol, is_spot = is_spot, "close leg incomplete");
            }
        } else {
            let side = if is_buy { OrderSide::Buy } else { OrderSide::Sell };
            let mut request = OrderRequest::market(symbol, side, size).reduce_only();
            request.is_spot = is_spot;
            if let Err(e) = self.orders.place(&request).await {
                warn!(symbol = %symbol, error = %e, "close order failed");
            }
        }
    }

    /// TWAP unwind: like [`execute_leg`] but reduce-only.
    async fn execute_reduce_leg(
        &self,
        symbol: &str,
        total_size: Decimal,
        is_spot: bool,
        is_buy: bool,
        abort: &AtomicBool,
    ) -> LegResult {
        let intervals = self.params.twap_intervals.max(1);
        let per_slice = total_size / Decimal::from(intervals);
        let side = if is_buy { OrderSide::Buy } else { OrderSide::Sell };

        let mut filled = Decimal::ZERO;

        for slice_index in 0..intervals {
            if abort.load(Ordering::Relaxed) {
                return LegResult {
                    filled,
                    complete: false,
                };
            }

            let qty = if slice_index + 1 == intervals {
                total_size - per_slice * Decimal::from(intervals - 1)
            } else {
                per_slice
            };

            let reference = match self.reference_price(symbol, is_spot).await {
                Ok(price) => price,
                Err(_) => {
                    abort.store(true, Ordering::Relaxed);
                    return LegResult {
                        filled,
                        complete: false,
                    };
                }
            };

            let mut request = OrderRequest::limit(symbol, side, qty, reference).reduce_only();
            request.is_spot = is_spot;

            let placed = self.orders.place(&request).await;
            let order_id = match placed {
                Ok(id) => id,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "reduce slice placement failed");
                    abort.store(true, Ordering::Relaxed);
                    return LegResult {
                        filled,
                        complete: false,
                    };
                }
            };

            match self
                .orders
                .wait_for_fill(symbol, order_id, self.params.execution_timeout)
                .await
            {
                Ok(FillOutcome::Filled(record)) => filled += record.executed_qty,
                Ok(FillOutcome::Terminal(record)) => {
                    filled += record.executed_qty;
                    abort.store(true, Ordering::Relaxed);
                    return LegResult {
                        filled,
                        complete: false,
                    };
                }
                Ok(FillOutcome::TimedOut) | Err(_) => {
                    let _ = self.orders.cancel(symbol, order_id).await;
                    abort.store(true, Ordering::Relaxed);
                    return LegResult {
                        filled,
                        complete: false,
                    };
                }
            }

            if slice_index + 1 < intervals {
                tokio::time::sleep(TWAP_SLICE_GAP).await;
            }
        }

        LegResult {
            filled,
            complete: true,
        }
    }

    /// Reduce both legs of a pair by `fraction`, dropping the entry once
    /// the residue is dust.
    pub async fn reduce_pair(&self, symbol: &str, fraction: Decimal) -> Result<(), ExchangeError> {
        let Some(pair) = self.state.lock().pairs.get(symbol).cloned() else {
            return Ok(());
        };

        let spot_cut = pair.spot_size.abs() * fraction;
        let futures_cut = pair.futures_size.abs() * fraction;
        let abort = AtomicBool::new(false);

        if spot_cut > Decimal::ZERO {
            self.close_leg(symbol, spot_cut, true, pair.spot_size < Decimal::ZERO, &abort)
                .await;
        }
        if futures_cut > Decimal::ZERO {
            self.close_leg(
                symbol,
                futures_cut,
                false,
                pair.futures_size < Decimal::ZERO,
                &abort,
            )
            .await;
        }

        let mut state = self.state.lock();
        if let Some(pair) = state.pairs.get_mut(symbol) {
            pair.spot_size -= signed(spot_cut, pair.spot_size > Decimal::ZERO);
            pair.futures_size -= signed(futures_cut, pair.futures_size > Decimal::ZERO);

            if pair.spot_size.abs() < DUST_SIZE && pair.futures_size.abs() < DUST_SIZE {
                state.pairs.remove(symbol);
            }
        }

        Ok(())
    }

    /// Close every open pair. A second call with no pairs left is a no-op.
    pub async fn close_all_positions(&self) -> Result<(), ExchangeError> {
        let symbols: Vec<String> = self.state.lock().pairs.keys().cloned().collect();
        let now_ms = chrono::Utc::now().timestamp_millis();

        for symbol in symbols {
            self.close_pair(&symbol, now_ms).await?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn status(&self) -> EngineStatus {
        let state = self.state.lock();
        EngineStatus {
            in_window: state.in_window,
            open_pairs: state.pairs.len(),
            total_equity: state.total_equity,
            total_pnl: state.total_pnl,
        }
    }

    pub fn pairs(&self) -> Vec<PairState> {
        self.state.lock().pairs.values().cloned().collect()
    }

    #[cfg(test)]
    fn insert_pair(&self, pair: PairState) {
        self.state.lock().pairs.insert(pair.symbol.clone(), pair);
    }
}

fn signed(size: Decimal, positive: bool) -> Decimal {
    if positive {
        size
    } else {
        -size
    }
}
