//! The monitor service.

use crate::alert::AlertSink;
use crate::prometheus::render_metrics;
use common::ConfigTree;
use exchange_core::{ExchangeError, SharedExchangeApi};
use execution::SharedPositionManager;
use parking_lot::RwLock;
use risk::SharedRiskController;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Narrow read surface the monitor holds onto the strategy engine.
///
/// Keeping this an interface (rather than the engine type) breaks the
/// monitor <-> strategy reference cycle; the monitor can only read.
pub trait StrategyObserver: Send + Sync {
    fn in_window(&self) -> bool;
    fn open_pairs(&self) -> usize;
    fn total_pnl(&self) -> Decimal;
    fn total_equity(&self) -> Decimal;
}

/// Monitor configuration, from the `monitor` config block.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Snapshot cadence.
    pub check_interval: Duration,
    /// Consecutive collection failures before the system is declared
    /// unhealthy and emergency mode engages.
    pub max_errors_before_unhealthy: u32,
    /// Serve Prometheus text exposition.
    pub prometheus_enabled: bool,
    /// Bind address for the exposition endpoint.
    pub prometheus_bind_address: String,
    /// Alert when drawdown exceeds this.
    pub drawdown_alert_threshold: Decimal,
    /// Alert when total exposure exceeds this notional.
    pub exposure_alert_threshold: Decimal,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            max_errors_before_unhealthy: 3,
            prometheus_enabled: false,
            prometheus_bind_address: "127.0.0.1:9184".into(),
            drawdown_alert_threshold: dec!(0.1),
            exposure_alert_threshold: dec!(1000000),
        }
    }
}

impl MonitorConfig {
    /// Load from the `monitor` config block.
    pub fn from_config(tree: &ConfigTree) -> Self {
        let cfg = tree.sub("monitor");
        let defaults = Self::default();

        Self {
            check_interval: Duration::from_secs(cfg.get_u64("general.check_interval_sec", 10)),
            max_errors_before_unhealthy: cfg.get_u64(
                "general.max_errors_before_unhealthy",
                defaults.max_errors_before_unhealthy as u64,
            ) as u32,
            prometheus_enabled: cfg.get_bool("prometheus.enabled", defaults.prometheus_enabled),
            prometheus_bind_address: cfg.get_str(
                "prometheus.bind_address",
                &defaults.prometheus_bind_address,
            ),
            drawdown_alert_threshold: cfg.get_decimal(
                "alerts.drawdown_threshold",
                defaults.drawdown_alert_threshold,
            ),
            exposure_alert_threshold: cfg.get_decimal(
                "alerts.exposure_threshold",
                defaults.exposure_alert_threshold,
            ),
        }
    }
}

/// Per-symbol position view inside a snapshot.
#[derive(Debug, Clone)]
pub struct PositionMetrics {
    pub symbol: String,
    pub position_size: Decimal,
    pub unrealized_pnl: Decimal,
    pub distance_to_liquidation: Option<Decimal>,
}

/// One collected snapshot, also the input to the Prometheus renderer.
#[derive(Debug, Clone, Default)]
pub struct MonitorSnapshot {
    pub memory_usage_mb: f64,
    pub cpu_usage_pct: f64,
    pub positions: Vec<PositionMetrics>,
    pub total_exposure: Decimal,
    pub total_pnl: Decimal,
    pub total_equity: Decimal,
    pub current_drawdown: Decimal,
    pub open_pairs: usize,
    pub in_window: bool,
    pub total_trades: u64,
    pub funding_earned: Decimal,
    pub consecutive_errors: u32,
    pub collected_at_ms: i64,
}

/// Periodic metric collection and threshold alerting.
pub struct MonitorService {
    config: MonitorConfig,
    api: SharedExchangeApi,
    positions: SharedPositionManager,
    risk: SharedRiskController,
    strategy: Arc<dyn StrategyObserver>,
    alerts: Arc<dyn AlertSink>,
    snapshot: RwLock<MonitorSnapshot>,
    consecutive_errors: AtomicU32,
    total_trades: AtomicU64,
    funding_earned: RwLock<Decimal>,
}

impl MonitorService {
    pub fn new(
        config: MonitorConfig,
        api: SharedExchangeApi,
        positions: SharedPositionManager,
        risk: SharedRiskController,
        strategy: Arc<dyn StrategyObserver>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            config,
            api,
            positions,
            risk,
            strategy,
            alerts,
            snapshot: RwLock::new(MonitorSnapshot::default()),
            consecutive_errors: AtomicU32::new(0),
            total_trades: AtomicU64::new(0),
            funding_earned: RwLock::new(Decimal::ZERO),
        }
    }

    /// Count a completed trade in the cumulative counter.
    pub fn record_trade(&self) {
        self.total_trades.fetch_add(1, Ordering::Relaxed);
    }

    /// Accumulate a funding payment received.
    pub fn record_funding_earned(&self, amount: Decimal) {
        *self.funding_earned.write() += amount;
    }

    /// The latest collected snapshot.
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.snapshot.read().clone()
    }

    /// Run the monitor loop (and the exposition endpoint, if enabled)
    /// until shutdown.
    pub async fn run(self: Arc<Self>, shutdown_rx: watch::Receiver<bool>) {
        if self.config.prometheus_enabled {
            let service = Arc::clone(&self);
            let exposition_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = service.serve_metrics(exposition_shutdown).await {
                    warn!(error = %e, "metrics endpoint stopped");
                }
            });
        }

        let mut shutdown_rx = shutdown_rx;
        let mut interval = tokio::time::interval(self.config.check_interval);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("monitor stopping");
                        return;
                    }
                }

                _ = interval.tick() => {
                    match self.collect().await {
                        Ok(snapshot) => {
                            self.consecutive_errors.store(0, Ordering::Relaxed);
                            self.check_thresholds(&snapshot);
                            *self.snapshot.write() = snapshot;
                        }
                        Err(e) => {
                            warn!(error = %e, "metric collection failed");
                            self.note_collection_failure();
                        }
                    }
                }
            }
        }
    }

    /// Gather one snapshot from the read interfaces.
    pub async fn collect(&self) -> Result<MonitorSnapshot, ExchangeError> {
        let now_ms = chrono::Utc::now().timestamp_millis();

        // Touch the venue so connectivity problems surface here
        let _ = self
            .api
            .balance("USDT")
            .await
            .map_err(|e| ExchangeError::transport("monitor_collect", e.to_string()))?;

        let position_records = self.positions.all();
        let positions = position_records
            .iter()
            .map(|p| PositionMetrics {
                symbol: p.symbol.clone(),
                position_size: p.size,
                unrealized_pnl: p.unrealized_pnl,
                distance_to_liquidation: p.liquidation_distance(),
            })
            .collect();

        let risk_metrics = self.risk.metrics();

        Ok(MonitorSnapshot {
            memory_usage_mb: process_memory_mb(),
            cpu_usage_pct: process_cpu_pct(),
            positions,
            total_exposure: self.positions.total_exposure(),
            total_pnl: self.strategy.total_pnl(),
            total_equity: self.strategy.total_equity(),
            current_drawdown: risk_metrics.current_drawdown,
            open_pairs: self.strategy.open_pairs(),
            in_window: self.strategy.in_window(),
            total_trades: self.total_trades.load(Ordering::Relaxed),
            funding_earned: *self.funding_earned.read(),
            consecutive_errors: self.consecutive_errors.load(Ordering::Relaxed),
            collected_at_ms: now_ms,
        })
    }

    /// Count one collection failure; after
    /// `max_errors_before_unhealthy` consecutive failures the system is
    /// declared unhealthy and emergency mode engages.
    fn note_collection_failure(&self) {
        let failures = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;

        if failures >= self.config.max_errors_before_unhealthy {
            self.alerts.alert(
                "monitor",
                "system unhealthy: repeated collection failures, engaging emergency mode",
            );
            self.risk.set_emergency_mode(true);
        }
    }

    fn check_thresholds(&self, snapshot: &MonitorSnapshot) {
        if snapshot.current_drawdown > self.config.drawdown_alert_threshold {
            self.alerts.alert(
                "drawdown",
                &format!(
                    "current drawdown {} above threshold {}",
                    snapshot.current_drawdown, self.config.drawdown_alert_threshold
                ),
            );
        }

        if snapshot.total_exposure > self.config.exposure_alert_threshold {
            self.alerts.alert(
                "exposure",
                &format!(
                    "total exposure {} above threshold {}",
                    snapshot.total_exposure, self.config.exposure_alert_threshold
                ),
            );
        }

        for position in &snapshot.positions {
            if let Some(distance) = position.distance_to_liquidation {
                if distance < dec!(0.1) {
                    self.alerts.alert(
                        "liquidation",
                        &format!(
                            "{} within {} of liquidation price",
                            position.symbol, distance
                        ),
                    );
                }
            }
        }
    }

    /// Minimal HTTP/1.1 responder for GET /metrics.
    async fn serve_metrics(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.prometheus_bind_address).await?;
        info!(addr = %self.config.prometheus_bind_address, "metrics endpoint listening");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Ok(());
                    }
                }

                accepted = listener.accept() => {
                    let (mut stream, peer) = accepted?;
                    debug!(peer = %peer, "metrics request");

                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;

                    let body = render_metrics(&self.snapshot());
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                }
            }
        }
    }
}

/// Resident memory of this process in megabytes (0 when unavailable).
fn process_memory_mb() -> f64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|s| {
            s.split_whitespace()
                .nth(1)
                .and_then(|pages| pages.parse::<f64>().ok())
        })
        .map(|pages| pages * 4096.0 / (1024.0 * 1024.0))
        .unwrap_or(0.0)
}

/// Total CPU seconds consumed by this process, as a coarse usage figure
/// (0 when unavailable).
fn process_cpu_pct() -> f64 {
    std::fs::read_to_string("/proc/self/stat")
        .ok()
        .and_then(|s| {
            let fields: Vec<&str> = s.split_whitespace().collect();
            let utime: f64 = fields.get(13)?.parse().ok()?;
            let stime: f64 = fields.get(14)?.parse().ok()?;
            Some((utime + stime) / 100.0)
        })
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use execution::mock_api::MockExchange;
    use execution::{OrderManager, OrderManagerConfig, PositionManager};
    use model::PositionRecord;
    use parking_lot::Mutex;
    use risk::{RiskControlSettings, RiskController, RiskLimits};

    struct FixedStrategy;

    impl StrategyObserver for FixedStrategy {
        fn in_window(&self) -> bool {
            true
        }
        fn open_pairs(&self) -> usize {
            2
        }
        fn total_pnl(&self) -> Decimal {
            dec!(42)
        }
        fn total_equity(&self) -> Decimal {
            dec!(100000)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        alerts: Mutex<Vec<(String, String)>>,
    }

    impl AlertSink for RecordingSink {
        fn alert(&self, source: &str, message: &str) {
            self.alerts
                .lock()
                .push((source.to_string(), message.to_string()));
        }
    }

    fn setup(config: MonitorConfig) -> (Arc<RecordingSink>, Arc<RiskController>, MonitorService) {
        let api = Arc::new(MockExchange::new());
        let orders = Arc::new(OrderManager::new(api.clone(), OrderManagerConfig::default()));
        let positions = Arc::new(PositionManager::new(api.clone(), orders.clone()));
        let risk = Arc::new(RiskController::new(
            RiskLimits::default(),
            RiskControlSettings::default(),
            api.clone(),
            orders,
            positions.clone(),
        ));
        let sink = Arc::new(RecordingSink::default());

        let service = MonitorService::new(
            config,
            api,
            positions,
            risk.clone(),
            Arc::new(FixedStrategy),
            sink.clone(),
        );
        (sink, risk, service)
    }

    #[tokio::test]
    async fn test_collect_builds_snapshot() {
        let (_sink, _risk, service) = setup(MonitorConfig::default());

        service.record_trade();
        service.record_trade();
        service.record_funding_earned(dec!(1.5));

        let snapshot = service.collect().await.unwrap();
        assert_eq!(snapshot.total_trades, 2);
        assert_eq!(snapshot.funding_earned, dec!(1.5));
        assert_eq!(snapshot.open_pairs, 2);
        assert!(snapshot.in_window);
        assert_eq!(snapshot.total_pnl, dec!(42));
    }

    #[tokio::test]
    async fn test_liquidation_proximity_alert() {
        let (sink, _risk, service) = setup(MonitorConfig::default());

        service.positions.handle_position_update(&PositionRecord {
            size: dec!(1),
            entry_price: dec!(50000),
            mark_price: dec!(41000),
            liquidation_price: dec!(40000),
            ..PositionRecord::flat("BTCUSDT")
        });

        let snapshot = service.collect().await.unwrap();
        service.check_thresholds(&snapshot);

        let alerts = sink.alerts.lock();
        assert!(alerts.iter().any(|(source, _)| source == "liquidation"));
    }

    #[tokio::test]
    async fn test_exposure_alert() {
        let config = MonitorConfig {
            exposure_alert_threshold: dec!(10000),
            ..MonitorConfig::default()
        };
        let (sink, _risk, service) = setup(config);

        service.positions.handle_position_update(&PositionRecord {
            size: dec!(1),
            mark_price: dec!(50000),
            entry_price: dec!(50000),
            ..PositionRecord::flat("BTCUSDT")
        });

        let snapshot = service.collect().await.unwrap();
        service.check_thresholds(&snapshot);

        let alerts = sink.alerts.lock();
        assert!(alerts.iter().any(|(source, _)| source == "exposure"));
    }

    #[tokio::test]
    async fn test_repeated_failures_engage_emergency_mode() {
        let (sink, risk, service) = setup(MonitorConfig::default());

        assert!(!risk.emergency_mode());
        service.note_collection_failure();
        service.note_collection_failure();
        assert!(!risk.emergency_mode());

        // Third consecutive failure crosses max_errors_before_unhealthy
        service.note_collection_failure();
        assert!(risk.emergency_mode());
        assert!(sink.alerts.lock().iter().any(|(source, _)| source == "monitor"));
    }

    #[test]
    fn test_config_from_tree() {
        let tree = ConfigTree::from_pairs([
            ("monitor.general.check_interval_sec", "5"),
            ("monitor.prometheus.enabled", "true"),
            ("monitor.prometheus.bind_address", "0.0.0.0:9999"),
        ]);

        let config = MonitorConfig::from_config(&tree);
        assert_eq!(config.check_interval, Duration::from_secs(5));
        assert!(config.prometheus_enabled);
        assert_eq!(config.prometheus_bind_address, "0.0.0.0:9999");
        assert_eq!(config.max_errors_before_unhealthy, 3);
    }
}
