//! The risk controller.

use crate::drawdown::DrawdownTracker;
use crate::types::{
    RiskControlSettings, RiskEvent, RiskEventType, RiskLimits, RiskMetrics, RiskReport,
};
use exchange_core::SharedExchangeApi;
use execution::{SharedOrderManager, SharedPositionManager};
use model::{OrderRequest, OrderSide, PositionRecord};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Relative distance to the liquidation price that triggers a warning.
const LIQUIDATION_BUFFER: Decimal = dec!(0.05);
/// Price observations kept per symbol for the volatility check.
const PRICE_WINDOW: usize = 60;
/// Event retention window.
const EVENT_RETENTION_MS: i64 = 24 * 3_600_000;

struct ControllerState {
    metrics: RiskMetrics,
    events: VecDeque<RiskEvent>,
    trade_times_ms: VecDeque<i64>,
    price_windows: HashMap<String, VecDeque<Decimal>>,
    pnl_history: VecDeque<(i64, Decimal)>,
    drawdown: DrawdownTracker,
    available_balance: Decimal,
    total_pnl: Decimal,
}

/// Pre-trade gatekeeper and continuous monitor.
///
/// All mutable state sits behind one lock, acquired last in the system's
/// lock order; emergency actions are executed after the lock is released.
pub struct RiskController {
    limits: RiskLimits,
    settings: RiskControlSettings,
    api: SharedExchangeApi,
    orders: SharedOrderManager,
    positions: SharedPositionManager,
    emergency_mode: AtomicBool,
    state: RwLock<ControllerState>,
}

impl RiskController {
    pub fn new(
        limits: RiskLimits,
        settings: RiskControlSettings,
        api: SharedExchangeApi,
        orders: SharedOrderManager,
        positions: SharedPositionManager,
    ) -> Self {
        Self {
            limits,
            settings,
            api,
            orders,
            positions,
            emergency_mode: AtomicBool::new(false),
            state: RwLock::new(ControllerState {
                metrics: RiskMetrics::default(),
                events: VecDeque::new(),
                trade_times_ms: VecDeque::new(),
                price_windows: HashMap::new(),
                pnl_history: VecDeque::new(),
                drawdown: DrawdownTracker::new(),
                available_balance: Decimal::ZERO,
                total_pnl: Decimal::ZERO,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Pre-trade
    // ------------------------------------------------------------------

    /// Conjunctive pre-trade check. Every clause must hold; failures record
    /// a risk event and veto the position.
    pub fn approve_new_position(
        &self,
        symbol: &str,
        size: Decimal,
        funding_rate: Decimal,
    ) -> bool {
        let now_ms = chrono::Utc::now().timestamp_millis();

        if self.emergency_mode.load(Ordering::Relaxed) {
            warn!(symbol = %symbol, "position vetoed: emergency mode active");
            return false;
        }

        if size > self.limits.max_position_size {
            self.record_event(
                RiskEventType::PositionLimitBreach,
                symbol,
                size,
                self.limits.max_position_size,
                now_ms,
            );
            return false;
        }

        let total = size + self.positions.total_size_excluding(symbol);
        if total > self.limits.max_total_positions {
            self.record_event(
                RiskEventType::PositionLimitBreach,
                symbol,
                total,
                self.limits.max_total_positions,
                now_ms,
            );
            return false;
        }

        let (last_price, volatility, available_balance, hourly_trades) = {
            let state = self.state.read();
            let window = state.price_windows.get(symbol);
            let last_price = window.and_then(|w| w.back().copied()).unwrap_or(Decimal::ZERO);
            let volatility = window.map(volatility_of).unwrap_or(Decimal::ZERO);
            let hourly_trades = state
                .trade_times_ms
                .iter()
                .filter(|t| now_ms - **t <= 3_600_000)
                .count() as u32;
            (last_price, volatility, state.available_balance, hourly_trades)
        };

        let required_margin =
            size * last_price / Decimal::from(self.limits.default_leverage.max(1));
        if required_margin > available_balance {
            self.record_event(
                RiskEventType::MarginCall,
                symbol,
                required_margin,
                available_balance,
                now_ms,
            );
            return false;
        }

        let funding_exposure = funding_rate.abs() * size;
        if funding_exposure > self.limits.max_funding_exposure {
            self.record_event(
                RiskEventType::FundingRateWarning,
                symbol,
                funding_exposure,
                self.limits.max_funding_exposure,
                now_ms,
            );
            return false;
        }

        if volatility > self.limits.max_volatility {
            self.record_event(
                RiskEventType::HighVolatility,
                symbol,
                volatility,
                self.limits.max_volatility,
                now_ms,
            );
            return false;
        }

        if hourly_trades >= self.limits.max_trades_per_hour {
            self.record_event(
                RiskEventType::TradeFrequencyWarning,
                symbol,
                Decimal::from(hourly_trades),
                Decimal::from(self.limits.max_trades_per_hour),
                now_ms,
            );
            return false;
        }

        true
    }

    // ------------------------------------------------------------------
    // Observations
    // ------------------------------------------------------------------

    /// Feed a price observation into the volatility window.
    pub fn observe_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.write();
        let window = state.price_windows.entry(symbol.to_string()).or_default();
        window.push_back(price);
        if window.len() > PRICE_WINDOW {
            window.pop_front();
        }
    }

    /// Record the account balance read this tick.
    pub fn update_balance(&self, balance: Decimal) {
        self.state.write().available_balance = balance;
    }

    /// Count a completed trade toward the hourly frequency limit.
    pub fn record_trade(&self, now_ms: i64) {
        let mut state = self.state.write();
        state.trade_times_ms.push_back(now_ms);
        while let Some(front) = state.trade_times_ms.front() {
            if now_ms - *front > 3_600_000 {
                state.trade_times_ms.pop_front();
            } else {
                break;
            }
        }
        state.metrics.hourly_trade_count = state.trade_times_ms.len() as u32;
    }

    /// Record current total PnL, updating rolling loss and drawdown
    /// aggregates; a crossed limit records an event and may de-risk.
    pub async fn record_pnl(&self, total_pnl: Decimal, now_ms: i64) {
        let mut breach = None;

        {
            let mut state = self.state.write();
            state.total_pnl = total_pnl;

            state.pnl_history.push_back((now_ms, total_pnl));
            while let Some((ts, _)) = state.pnl_history.front() {
                if now_ms - *ts > EVENT_RETENTION_MS {
                    state.pnl_history.pop_front();
                } else {
                    break;
                }
            }

            let hourly_base = state
                .pnl_history
                .iter()
                .find(|(ts, _)| now_ms - *ts <= 3_600_000)
                .map(|(_, pnl)| *pnl)
                .unwrap_or(total_pnl);
            let daily_base = state
                .pnl_history
                .front()
                .map(|(_, pnl)| *pnl)
                .unwrap_or(total_pnl);

            state.metrics.hourly_pnl = total_pnl - hourly_base;
            state.metrics.daily_pnl = total_pnl - daily_base;

            state.drawdown.record(total_pnl, now_ms);
            state.metrics.peak_equity = state.drawdown.peak();
            state.metrics.current_drawdown = state.drawdown.current_drawdown(total_pnl);
            state.metrics.max_drawdown = state.drawdown.max_drawdown();
            state.metrics.last_update_ms = now_ms;

            if state.metrics.current_drawdown > self.limits.max_drawdown {
                breach = Some((
                    RiskEventType::DrawdownLimitBreach,
                    state.metrics.current_drawdown,
                    self.limits.max_drawdown,
                ));
            } else if state.metrics.hourly_pnl < -self.limits.max_hourly_loss {
                breach = Some((
                    RiskEventType::DailyLossLimitBreach,
                    state.metrics.hourly_pnl.abs(),
                    self.limits.max_hourly_loss,
                ));
            } else if state.metrics.daily_pnl < -self.limits.max_daily_loss {
                breach = Some((
                    RiskEventType::DailyLossLimitBreach,
                    state.metrics.daily_pnl.abs(),
                    self.limits.max_daily_loss,
                ));
            }
        }

        if let Some((event_type, current, threshold)) = breach {
            self.record_event(event_type, "GLOBAL", current, threshold, now_ms);
            if event_type == RiskEventType::DrawdownLimitBreach {
                self.run_emergency_actions_all().await;
            }
        }
    }

    /// Recompute metrics and thresholds after a position update.
    pub async fn on_position_update(&self, record: &PositionRecord) {
        let now_ms = chrono::Utc::now().timestamp_millis();

        {
            let mut state = self.state.write();
            let all = self.positions.all();
            state.metrics.total_exposure = all.iter().map(|p| p.notional()).sum();
            state.metrics.largest_position = all
                .iter()
                .map(|p| p.notional())
                .max()
                .unwrap_or(Decimal::ZERO);
            state.metrics.last_update_ms = now_ms;
        }

        if record.is_flat() {
            return;
        }

        let margin_ratio = record.margin_ratio();
        if margin_ratio > Decimal::ZERO && margin_ratio < self.limits.min_margin_ratio {
            self.record_event(
                RiskEventType::MarginCall,
                &record.symbol,
                margin_ratio,
                self.limits.min_margin_ratio,
                now_ms,
            );
        }

        if let Some(distance) = record.liquidation_distance() {
            if distance < LIQUIDATION_BUFFER {
                self.record_event(
                    RiskEventType::LiquidationWarning,
                    &record.symbol,
                    distance,
                    LIQUIDATION_BUFFER,
                    now_ms,
                );
                self.run_emergency_actions(&record.symbol).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Emergency handling
    // ------------------------------------------------------------------

    /// De-risk one symbol: shed half the position (reduce-only) and halve
    /// leverage, as configured.
    pub async fn run_emergency_actions(&self, symbol: &str) {
        let Some(position) = self.positions.get(symbol) else {
            return;
        };
        if position.is_flat() {
            return;
        }

        if self.settings.auto_reduce_position {
            let reduction = position.abs_size() * self.settings.position_reduction_ratio;
            if reduction > Decimal::ZERO {
                let side = if position.is_long() {
                    OrderSide::Sell
                } else {
                    OrderSide::Buy
                };
                let request = OrderRequest::market(symbol, side, reduction).reduce_only();

                match self.orders.place(&request).await {
                    Ok(order_id) => {
                        info!(symbol = %symbol, order_id = order_id, reduction = %reduction,
                              "emergency position reduction placed");
                    }
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "emergency reduction failed");
                    }
                }
            }
        }

        if self.settings.auto_adjust_leverage && position.leverage > 1 {
            let new_leverage = (position.leverage / 2).max(1);
            if let Err(e) = self.api.set_leverage(symbol, new_leverage).await {
                warn!(symbol = %symbol, error = %e, "emergency leverage reduction failed");
            } else {
                info!(symbol = %symbol, leverage = new_leverage, "emergency leverage reduction");
            }
        }
    }

    async fn run_emergency_actions_all(&self) {
        let symbols: Vec<String> =
            self.positions.all().into_iter().map(|p| p.symbol).collect();
        for symbol in symbols {
            self.run_emergency_actions(&symbol).await;
        }
    }

    /// Engage or clear emergency mode. While set, every new position is
    /// vetoed; only an operator clears it.
    pub fn set_emergency_mode(&self, enabled: bool) {
        let was = self.emergency_mode.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            if enabled {
                warn!("EMERGENCY MODE ENGAGED - all new positions vetoed");
            } else {
                info!("emergency mode cleared by operator");
            }
        }
    }

    pub fn emergency_mode(&self) -> bool {
        self.emergency_mode.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    pub fn metrics(&self) -> RiskMetrics {
        self.state.read().metrics.clone()
    }

    /// Events recorded within the retention window, oldest first.
    pub fn recent_events(&self) -> Vec<RiskEvent> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut state = self.state.write();
        cleanup_events(&mut state.events, now_ms);
        state.events.iter().cloned().collect()
    }

    /// Per-symbol report: metrics, matching events, warnings and
    /// recommendations.
    pub fn report(&self, symbol: &str) -> RiskReport {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let metrics = self.metrics();
        let recent_events: Vec<RiskEvent> = self
            .recent_events()
            .into_iter()
            .filter(|e| e.symbol == symbol || e.symbol == "GLOBAL")
            .collect();

        let mut warnings: Vec<String> = recent_events
            .iter()
            .map(|e| format!("{}: {}", e.symbol, e.message))
            .collect();
        warnings.dedup();

        let mut recommendations = Vec::new();
        if let Some(position) = self.positions.get(symbol) {
            let leverage_cap = self.limits.max_leverage as f64 * 0.8;
            if position.leverage as f64 > leverage_cap {
                recommendations
                    .push("consider reducing leverage to decrease liquidation risk".to_string());
            }
        }
        if metrics.current_drawdown > self.limits.max_drawdown * dec!(0.7) {
            recommendations
                .push("consider reducing position size to manage drawdown risk".to_string());
        }
        if metrics.hourly_trade_count as f64
            > self.limits.max_trades_per_hour as f64 * 0.8
        {
            recommendations.push("trade frequency near limit, slow down".to_string());
        }

        RiskReport {
            symbol: symbol.to_string(),
            metrics,
            recent_events,
            warnings,
            recommendations,
            report_time_ms: now_ms,
        }
    }

    fn record_event(
        &self,
        event_type: RiskEventType,
        symbol: &str,
        current_value: Decimal,
        threshold_value: Decimal,
        now_ms: i64,
    ) {
        let event = RiskEvent {
            event_type,
            symbol: symbol.to_string(),
            message: event_type.message().to_string(),
            current_value,
            threshold_value,
            time_ms: now_ms,
        };

        warn!(
            symbol = %event.symbol,
            event = ?event.event_type,
            current = %event.current_value,
            threshold = %event.threshold_value,
            "risk event recorded"
        );

        let mut state = self.state.write();
        state.events.push_back(event);
        cleanup_events(&mut state.events, now_ms);
    }
}

fn cleanup_events(events: &mut VecDeque<RiskEvent>, now_ms: i64) {
    while let Some(front) = events.front() {
        if now_ms - front.time_ms > EVENT_RETENTION_MS {
            events.pop_front();
        } else {
            break;
        }
    }
}

/// Range over mean of the observed prices.
fn volatility_of(window: &VecDeque<Decimal>) -> Decimal {
    if window.len() < 2 {
        return Decimal::ZERO;
    }
    let max = window.iter().copied().max().unwrap_or(Decimal::ZERO);
    let min = window.iter().copied().min().unwrap_or(Decimal::ZERO);
    let mean: Decimal = window.iter().copied().sum::<Decimal>() / Decimal::from(window.len());
    if mean > Decimal::ZERO {
        (max - min) / mean
    } else {
        Decimal::ZERO
    }
}

/// Shared risk controller handle.
pub type SharedRiskController = Arc<RiskController>;

#[cfg(test)]
mod tests {
    use super::*;
    use execution::mock_api::MockExchange;
    use execution::{OrderManager, OrderManagerConfig, PositionManager};

    fn setup() -> (Arc<MockExchange>, RiskController) {
        setup_with_limits(RiskLimits::default())
    }

    fn setup_with_limits(limits: RiskLimits) -> (Arc<MockExchange>, RiskController) {
        let api = Arc::new(MockExchange::new());
        let orders = Arc::new(OrderManager::new(api.clone(), OrderManagerConfig::default()));
        let positions = Arc::new(PositionManager::new(api.clone(), orders.clone()));
        let controller = RiskController::new(
            limits,
            RiskControlSettings::default(),
            api.clone(),
            orders,
            positions,
        );
        controller.update_balance(dec!(100000));
        controller.observe_price("BTCUSDT", dec!(50000));
        (api, controller)
    }

    fn position(symbol: &str, size: Decimal) -> PositionRecord {
        PositionRecord {
            size,
            entry_price: dec!(50000),
            mark_price: dec!(50000),
            margin: dec!(5000),
            leverage: 10,
            liquidation_price: dec!(40000),
            ..PositionRecord::flat(symbol)
        }
    }

    #[test]
    fn test_approve_within_limits() {
        let (_api, controller) = setup();
        assert!(controller.approve_new_position("BTCUSDT", dec!(0.5), dec!(0.001)));
    }

    #[test]
    fn test_emergency_mode_vetoes_everything() {
        let (_api, controller) = setup();
        controller.set_emergency_mode(true);

        assert!(!controller.approve_new_position("BTCUSDT", dec!(0.001), dec!(0.0001)));

        controller.set_emergency_mode(false);
        assert!(controller.approve_new_position("BTCUSDT", dec!(0.001), dec!(0.0001)));
    }

    #[test]
    fn test_single_position_size_limit() {
        let (_api, controller) = setup();

        assert!(!controller.approve_new_position("BTCUSDT", dec!(1.5), dec!(0.001)));
        let events = controller.recent_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, RiskEventType::PositionLimitBreach);
    }

    #[test]
    fn test_total_position_limit_counts_others() {
        let (_api, controller) = setup();
        controller
            .positions
            .handle_position_update(&position("ETHUSDT", dec!(2.6)));

        // 0.5 + 2.6 > 3.0
        assert!(!controller.approve_new_position("BTCUSDT", dec!(0.5), dec!(0.001)));
    }

    #[test]
    fn test_margin_requirement() {
        let (_api, controller) = setup();
        controller.update_balance(dec!(100));

        // 0.5 * 50000 / 1 = 25000 margin required, only 100 available
        assert!(!controller.approve_new_position("BTCUSDT", dec!(0.5), dec!(0.001)));
        let events = controller.recent_events();
        assert_eq!(events[0].event_type, RiskEventType::MarginCall);
    }

    #[test]
    fn test_funding_exposure_limit() {
        let (_api, controller) = setup();

        // |0.02| * 0.6 = 0.012 > 0.01
        assert!(!controller.approve_new_position("BTCUSDT", dec!(0.6), dec!(0.02)));
        let events = controller.recent_events();
        assert_eq!(events[0].event_type, RiskEventType::FundingRateWarning);
    }

    #[test]
    fn test_volatility_limit() {
        let (_api, controller) = setup();
        // Range 10000 over mean ~50000 = 0.2 > 0.05
        controller.observe_price("BTCUSDT", dec!(45000));
        controller.observe_price("BTCUSDT", dec!(55000));

        assert!(!controller.approve_new_position("BTCUSDT", dec!(0.1), dec!(0.001)));
        let events = controller.recent_events();
        assert_eq!(events[0].event_type, RiskEventType::HighVolatility);
    }

    #[test]
    fn test_trade_frequency_limit() {
        let limits = RiskLimits {
            max_trades_per_hour: 2,
            ..RiskLimits::default()
        };
        let (_api, controller) = setup_with_limits(limits);

        let now_ms = chrono::Utc::now().timestamp_millis();
        controller.record_trade(now_ms);
        controller.record_trade(now_ms);

        assert!(!controller.approve_new_position("BTCUSDT", dec!(0.1), dec!(0.001)));
        let events = controller.recent_events();
        assert_eq!(events[0].event_type, RiskEventType::TradeFrequencyWarning);
    }

    #[tokio::test]
    async fn test_drawdown_breach_triggers_reduction() {
        let (api, controller) = setup();
        controller
            .positions
            .handle_position_update(&position("BTCUSDT", dec!(1)));

        // Build the hourly series [100, 90, 80, 70, 60, 50]
        let mut now_ms = chrono::Utc::now().timestamp_millis();
        for pnl in [100, 90, 80, 70, 60, 50] {
            controller.record_pnl(Decimal::from(pnl), now_ms).await;
            now_ms += 3_600_001;
        }

        let metrics = controller.metrics();
        assert_eq!(metrics.peak_equity, dec!(100));
        assert_eq!(metrics.current_drawdown, dec!(0.5));

        let events = controller.recent_events();
        assert!(events
            .iter()
            .any(|e| e.event_type == RiskEventType::DrawdownLimitBreach));

        // Emergency action: reduce-only order for 50% of the position
        let placed = api.placed_requests();
        assert!(!placed.is_empty());
        let reduction = placed.last().unwrap();
        assert!(reduction.reduce_only);
        assert_eq!(reduction.quantity, dec!(0.5));
    }

    #[tokio::test]
    async fn test_liquidation_warning_and_leverage_halving() {
        let (api, controller) = setup();

        let mut record = position("BTCUSDT", dec!(1));
        record.mark_price = dec!(41000);
        record.liquidation_price = dec!(40000); // distance ~2.4% < 5%
        controller.positions.handle_position_update(&record);

        controller.on_position_update(&record).await;

        let events = controller.recent_events();
        assert!(events
            .iter()
            .any(|e| e.event_type == RiskEventType::LiquidationWarning));

        // Leverage halved from 10 to 5
        assert_eq!(api.leverage_calls(), vec![("BTCUSDT".to_string(), 5)]);
    }

    #[tokio::test]
    async fn test_margin_call_event_on_thin_margin() {
        let (_api, controller) = setup();

        let mut record = position("BTCUSDT", dec!(1));
        record.margin = dec!(100); // ratio 100/50000 = 0.002 < 0.05
        record.liquidation_price = Decimal::ZERO;
        controller.positions.handle_position_update(&record);

        controller.on_position_update(&record).await;

        let events = controller.recent_events();
        assert!(events
            .iter()
            .any(|e| e.event_type == RiskEventType::MarginCall));
    }

    #[tokio::test]
    async fn test_hourly_loss_breach() {
        let limits = RiskLimits {
            max_hourly_loss: dec!(10),
            max_daily_loss: dec!(1000),
            ..RiskLimits::default()
        };
        let (_api, controller) = setup_with_limits(limits);

        let now_ms = chrono::Utc::now().timestamp_millis();
        controller.record_pnl(dec!(0), now_ms).await;
        controller.record_pnl(dec!(-20), now_ms + 60_000).await;

        let events = controller.recent_events();
        assert!(events
            .iter()
            .any(|e| e.event_type == RiskEventType::DailyLossLimitBreach));
    }

    #[test]
    fn test_report_contains_matching_events() {
        let (_api, controller) = setup();

        assert!(!controller.approve_new_position("BTCUSDT", dec!(5), dec!(0.001)));
        assert!(!controller.approve_new_position("ETHUSDT", dec!(5), dec!(0.001)));

        let report = controller.report("BTCUSDT");
        assert_eq!(report.recent_events.len(), 1);
        assert_eq!(report.recent_events[0].symbol, "BTCUSDT");
    }

    #[test]
    fn test_metrics_updated_by_trades() {
        let (_api, controller) = setup();
        let now_ms = chrono::Utc::now().timestamp_millis();

        controller.record_trade(now_ms);
        controller.record_trade(now_ms);

        assert_eq!(controller.metrics().hourly_trade_count, 2);
    }
}
