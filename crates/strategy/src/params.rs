//! Strategy parameters.

use common::ConfigTree;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

/// Tunables for the funding-arbitrage engine, loaded from the
/// `strategy.funding_arbitrage` config block.
#[derive(Debug, Clone)]
pub struct FundingArbParams {
    /// Keep the N instruments with the largest |funding rate|.
    pub top_n_instruments: usize,
    /// Reject instruments whose |basis| is below this.
    pub min_basis_ratio: Decimal,
    /// Reject instruments whose |funding rate| is below this.
    pub min_funding_rate: Decimal,
    /// Length of the pre-funding trading window.
    pub pre_funding_minutes: i64,
    /// Target notional per pair leg.
    pub position_size_usd: Decimal,
    /// Per-symbol cap as a fraction of total equity.
    pub max_position_per_symbol: Decimal,
    /// Total position cap as a fraction of total equity.
    pub max_total_position: Decimal,
    /// Reject instruments scoring below this liquidity.
    pub min_liquidity_score: Decimal,
    /// Reject instruments whose spread/spot exceeds this.
    pub max_spread_ratio: Decimal,
    /// Reject instruments with less 24h quote volume than this.
    pub min_volume_usd: Decimal,
    /// Lookback for the market-impact trade-size average.
    pub min_market_impact_minutes: i64,
    /// Slice legs with TWAP.
    pub use_twap: bool,
    /// TWAP slices per leg.
    pub twap_intervals: u32,
    /// Per-slice fill timeout.
    pub execution_timeout: Duration,
    /// Slippage tolerance passed through to execution.
    pub max_slippage: Decimal,
    /// Close a pair once pnl/position_size_usd falls to this loss.
    pub stop_loss_ratio: Decimal,
    /// Close a pair once pnl/position_size_usd reaches this gain.
    pub profit_take_ratio: Decimal,
    /// Alert threshold for the engine's own drawdown bookkeeping.
    pub max_drawdown: Decimal,
    /// Rebalance once |spot + futures| exceeds this.
    pub position_imbalance_tolerance: Decimal,
    /// One-way taker fee used in the round-trip cost estimate.
    pub trading_fee: Decimal,
    /// Control loop period.
    pub tick_interval: Duration,
    /// Quote asset for equity and notional arithmetic.
    pub quote_asset: String,
    /// Pairs below this notional are not worth opening.
    pub min_notional_usd: Decimal,
}

impl Default for FundingArbParams {
    fn default() -> Self {
        Self {
            top_n_instruments: 5,
            min_basis_ratio: dec!(0.0008),
            min_funding_rate: dec!(0.0001),
            pre_funding_minutes: 60,
            position_size_usd: dec!(1000),
            max_position_per_symbol: dec!(0.1),
            max_total_position: dec!(0.5),
            min_liquidity_score: dec!(0.7),
            max_spread_ratio: dec!(0.001),
            min_volume_usd: dec!(1000000),
            min_market_impact_minutes: 5,
            use_twap: true,
            twap_intervals: 3,
            execution_timeout: Duration::from_secs(30),
            max_slippage: dec!(0.001),
            stop_loss_ratio: dec!(0.005),
            profit_take_ratio: dec!(0.003),
            max_drawdown: dec!(0.02),
            position_imbalance_tolerance: dec!(0.01),
            trading_fee: dec!(0.0004),
            tick_interval: Duration::from_secs(5),
            quote_asset: "USDT".into(),
            min_notional_usd: dec!(100),
        }
    }
}

impl FundingArbParams {
    /// Load parameters from the `strategy.funding_arbitrage` block.
    pub fn from_config(tree: &ConfigTree) -> Self {
        let cfg = tree.sub("strategy.funding_arbitrage");
        let defaults = Self::default();

        Self {
            top_n_instruments: cfg.get_u64("top_n_instruments", defaults.top_n_instruments as u64)
                as usize,
            min_basis_ratio: cfg.get_decimal("min_basis_ratio", defaults.min_basis_ratio),
            min_funding_rate: cfg.get_decimal("min_funding_rate", defaults.min_funding_rate),
            pre_funding_minutes: cfg.get_i64("pre_funding_minutes", defaults.pre_funding_minutes),
            position_size_usd: cfg.get_decimal("position_size_usd", defaults.position_size_usd),
            max_position_per_symbol: cfg
                .get_decimal("max_position_per_symbol", defaults.max_position_per_symbol),
            max_total_position: cfg.get_decimal("max_total_position", defaults.max_total_position),
            min_liquidity_score: cfg
                .get_decimal("min_liquidity_score", defaults.min_liquidity_score),
            max_spread_ratio: cfg.get_decimal("max_spread_ratio", defaults.max_spread_ratio),
            min_volume_usd: cfg.get_decimal("min_volume_usd", defaults.min_volume_usd),
            min_market_impact_minutes: cfg.get_i64(
                "min_market_impact_minutes",
                defaults.min_market_impact_minutes,
            ),
            use_twap: cfg.get_bool("use_twap", defaults.use_twap),
            twap_intervals: cfg.get_u64("twap_intervals", defaults.twap_intervals as u64) as u32,
            execution_timeout: Duration::from_secs(
                cfg.get_u64("execution_timeout_seconds", 30),
            ),
            max_slippage: cfg.get_decimal("max_slippage", defaults.max_slippage),
            stop_loss_ratio: cfg.get_decimal("stop_loss_ratio", defaults.stop_loss_ratio),
            profit_take_ratio: cfg.get_decimal("profit_take_ratio", defaults.profit_take_ratio),
            max_drawdown: cfg.get_decimal("max_drawdown", defaults.max_drawdown),
            position_imbalance_tolerance: cfg.get_decimal(
                "position_imbalance_tolerance",
                defaults.position_imbalance_tolerance,
            ),
            trading_fee: cfg.get_decimal("trading_fee", defaults.trading_fee),
            tick_interval: Duration::from_secs(cfg.get_u64("tick_interval_seconds", 5)),
            quote_asset: cfg.get_str("quote_asset", &defaults.quote_asset),
            min_notional_usd: cfg.get_decimal("min_notional_usd", defaults.min_notional_usd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let params = FundingArbParams::default();
        assert_eq!(params.top_n_instruments, 5);
        assert_eq!(params.min_funding_rate, dec!(0.0001));
        assert_eq!(params.pre_funding_minutes, 60);
        assert_eq!(params.twap_intervals, 3);
        assert_eq!(params.position_imbalance_tolerance, dec!(0.01));
    }

    #[test]
    fn test_from_config_overrides() {
        let tree = ConfigTree::from_pairs([
            ("strategy.funding_arbitrage.top_n_instruments", "1"),
            ("strategy.funding_arbitrage.position_size_usd", "1000"),
            ("strategy.funding_arbitrage.twap_intervals", "2"),
            ("strategy.funding_arbitrage.use_twap", "true"),
        ]);

        let params = FundingArbParams::from_config(&tree);
        assert_eq!(params.top_n_instruments, 1);
        assert_eq!(params.twap_intervals, 2);
        assert!(params.use_twap);
        // Unset keys keep defaults
        assert_eq!(params.pre_funding_minutes, 60);
    }
}
