//! Funding-rate arbitrage runner.
//!
//! Wires the exchange adapter, market data cache, order/position managers,
//! risk controller, strategy engine and monitor together, then runs until
//! Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! funding-arb [--close-on-exit] [--set key=value]... [SYMBOLS...]
//! ```
//!
//! Credentials come from `EXCHANGE_API_KEY` / `EXCHANGE_API_SECRET`
//! (a `.env` file is honoured). `--set` overrides individual config keys,
//! e.g. `--set strategy.funding_arbitrage.position_size_usd=500`.

use auth::ApiCredentials;
use common::{init_logging, ConfigTree};
use exchange_binance::{
    book_ticker_channel, mark_price_channel, BinanceApi, BinanceApiConfig, MarketStream,
    MarketStreamConfig,
};
use exchange_core::{create_stream_channel, SharedExchangeApi, StreamEvent};
use execution::{OrderManager, OrderManagerConfig, PositionManager};
use marketdata::MarketDataCache;
use monitor::{LogAlertSink, MonitorConfig, MonitorService, StrategyObserver};
use risk::{RiskControlSettings, RiskController, RiskLimits};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use strategy::{FundingArbEngine, FundingArbParams};
use tokio::sync::watch;
use tracing::{error, info, warn};

fn print_usage() {
    eprintln!("Usage: funding-arb [OPTIONS] [SYMBOLS...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --close-on-exit       Close all open pairs on shutdown");
    eprintln!("  --set key=value       Override a configuration key (repeatable)");
    eprintln!("  --help                Show this help message");
    eprintln!();
    eprintln!("Environment variables:");
    eprintln!("  EXCHANGE_API_KEY      API key for authenticated requests");
    eprintln!("  EXCHANGE_API_SECRET   Secret key for signing requests");
    eprintln!("  RUST_LOG              Log filter (default: info)");
}

/// Read-only view of the engine handed to the monitor.
struct EngineObserver(Arc<FundingArbEngine>);

impl StrategyObserver for EngineObserver {
    fn in_window(&self) -> bool {
        self.0.status().in_window
    }

    fn open_pairs(&self) -> usize {
        self.0.status().open_pairs
    }

    fn total_pnl(&self) -> Decimal {
        self.0.status().total_pnl
    }

    fn total_equity(&self) -> Decimal {
        self.0.status().total_equity
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut close_on_exit = false;
    let mut overrides: Vec<(String, String)> = Vec::new();
    let mut symbols: Vec<String> = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--close-on-exit" => close_on_exit = true,
            "--set" => match iter.next().and_then(|kv| kv.split_once('=')) {
                Some((key, value)) => overrides.push((key.to_string(), value.to_string())),
                None => {
                    eprintln!("--set requires key=value");
                    print_usage();
                    std::process::exit(1);
                }
            },
            "--help" | "-h" => {
                print_usage();
                return;
            }
            s if s.starts_with('-') => {
                eprintln!("Unknown option: {}", s);
                print_usage();
                std::process::exit(1);
            }
            symbol => symbols.push(symbol.to_uppercase()),
        }
    }

    let tree = ConfigTree::from_pairs(overrides);

    let credentials = match ApiCredentials::from_env() {
        Ok(creds) => {
            info!(api_key = %creds.api_key(), "loaded API credentials");
            creds
        }
        Err(e) => {
            error!(error = %e, "credentials required: set EXCHANGE_API_KEY and EXCHANGE_API_SECRET");
            std::process::exit(1);
        }
    };

    // ---------------------------------------------------------------
    // Adapter
    // ---------------------------------------------------------------
    let api_tree = tree.sub("api.binance");
    let api_config = BinanceApiConfig {
        futures_base_url: api_tree.get_str("base_url", "https://fapi.binance.com"),
        spot_base_url: api_tree.get_str("spot_base_url", "https://api.binance.com"),
        requests_per_second: api_tree.get_u64("rate_limit.requests_per_second", 20) as usize,
        orders_per_second: api_tree.get_u64("rate_limit.orders_per_second", 5) as usize,
        max_retries: api_tree.get_u64("retry.max_retries", 3) as u32,
        retry_delay: Duration::from_millis(api_tree.get_u64("retry.retry_delay_ms", 1000)),
        backoff_multiplier: api_tree.get_str("retry.backoff_multiplier", "2.0").parse().unwrap_or(2.0),
        ..BinanceApiConfig::default()
    };

    let api: SharedExchangeApi = match BinanceApi::new(credentials, api_config) {
        Ok(api) => {
            if let Err(e) = api.sync_time().await {
                warn!(error = %e, "server time sync failed, continuing with local clock");
            }
            Arc::new(api)
        }
        Err(e) => {
            error!(error = %e, "failed to build exchange adapter");
            std::process::exit(1);
        }
    };

    let stream_config = MarketStreamConfig {
        ws_url: api_tree.get_str("websocket.url", "wss://fstream.binance.com/stream"),
        ping_interval: Duration::from_secs(api_tree.get_u64("websocket.ping_interval_sec", 30)),
        pong_timeout: Duration::from_secs(api_tree.get_u64("websocket.pong_timeout_sec", 10)),
        max_reconnect_attempts: api_tree.get_u64("websocket.max_reconnect_attempts", 0) as u32,
        reconnect_interval: Duration::from_secs(
            api_tree.get_u64("websocket.reconnect_interval_sec", 1),
        ),
    };
    let stream = Arc::new(MarketStream::new(stream_config));

    for symbol in &symbols {
        stream.subscribe(&mark_price_channel(symbol));
        stream.subscribe(&book_ticker_channel(symbol));
    }

    // ---------------------------------------------------------------
    // Core components
    // ---------------------------------------------------------------
    let cache = Arc::new(MarketDataCache::new(30_000));
    let orders = Arc::new(OrderManager::new(api.clone(), OrderManagerConfig::default()));
    let positions = Arc::new(PositionManager::new(api.clone(), orders.clone()));
    let risk = Arc::new(RiskController::new(
        RiskLimits::from_config(&tree),
        RiskControlSettings::from_config(&tree),
        api.clone(),
        orders.clone(),
        positions.clone(),
    ));

    let params = FundingArbParams::from_config(&tree);
    let engine = Arc::new(FundingArbEngine::new(
        params,
        api.clone(),
        cache.clone(),
        orders.clone(),
        positions.clone(),
        risk.clone(),
    ));

    let monitor = Arc::new(MonitorService::new(
        MonitorConfig::from_config(&tree),
        api.clone(),
        positions.clone(),
        risk.clone(),
        Arc::new(EngineObserver(engine.clone())),
        Arc::new(LogAlertSink),
    ));

    info!(symbols = ?symbols, "starting funding arbitrage system");

    // ---------------------------------------------------------------
    // Tasks
    // ---------------------------------------------------------------
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_tx, mut event_rx) = create_stream_channel(1024);

    // Stream events fan out to the owning components; handlers never touch
    // the strategy state lock.
    let dispatch = {
        let cache = cache.clone();
        let orders = orders.clone();
        let positions = positions.clone();
        let risk = risk.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let now_ms = now_ms();
                cache.apply_event(&event, now_ms);
                match event {
                    StreamEvent::OrderUpdate(record) => {
                        orders.handle_order_update(&record);
                    }
                    StreamEvent::PositionUpdate(record) => {
                        positions.handle_position_update(&record);
                        risk.on_position_update(&record).await;
                    }
                    _ => {}
                }
            }
        })
    };

    let stream_task = {
        let stream = stream.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = stream.run(event_tx, shutdown).await {
                error!(error = %e, "market stream terminated");
            }
        })
    };

    let monitor_task = {
        let monitor = monitor.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            monitor.run(shutdown).await;
        })
    };

    let engine_task = {
        let engine = engine.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run(shutdown).await {
                error!(error = %e, "engine terminated with error");
            }
        })
    };

    // ---------------------------------------------------------------
    // Shutdown
    // ---------------------------------------------------------------
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received, shutting down"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    let _ = shutdown_tx.send(true);

    let _ = engine_task.await;
    let _ = monitor_task.await;
    let _ = stream_task.await;
    dispatch.abort();

    // In-flight orders are left alone unless a close-out was requested
    if close_on_exit {
        info!("closing all open pairs before exit");
        if let Err(e) = engine.close_all_positions().await {
            error!(error = %e, "failed to close positions on exit");
        }
    }

    info!("shutdown complete");
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
