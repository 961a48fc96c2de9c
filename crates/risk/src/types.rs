//! Risk limits, metrics, events and reports.

use common::ConfigTree;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Hard limits enforced by the pre-trade checks and continuous monitoring.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    /// Maximum size for a single position.
    pub max_position_size: Decimal,
    /// Cap on the sum of absolute sizes across positions.
    pub max_total_positions: Decimal,
    /// Maximum leverage the controller will tolerate.
    pub max_leverage: u32,
    /// Maximum drawdown before de-risking.
    pub max_drawdown: Decimal,
    /// Largest tolerated daily loss.
    pub max_daily_loss: Decimal,
    /// Largest tolerated hourly loss.
    pub max_hourly_loss: Decimal,
    /// Minimum margin ratio before a margin call event.
    pub min_margin_ratio: Decimal,
    /// Cap on |funding_rate| * size.
    pub max_funding_exposure: Decimal,
    /// Trades allowed in a rolling hour.
    pub max_trades_per_hour: u32,
    /// Volatility ceiling: recent price range over mean.
    pub max_volatility: Decimal,
    /// Leverage assumed when computing required margin.
    pub default_leverage: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: dec!(1.0),
            max_total_positions: dec!(3.0),
            max_leverage: 20,
            max_drawdown: dec!(0.1),
            max_daily_loss: dec!(0.05),
            max_hourly_loss: dec!(0.02),
            min_margin_ratio: dec!(0.05),
            max_funding_exposure: dec!(0.01),
            max_trades_per_hour: 30,
            max_volatility: dec!(0.05),
            default_leverage: 1,
        }
    }
}

impl RiskLimits {
    /// Load limits from the `risk.limits` config block.
    pub fn from_config(tree: &ConfigTree) -> Self {
        let limits = tree.sub("risk.limits");
        let defaults = Self::default();

        Self {
            max_position_size: limits.get_decimal("max_position_size", defaults.max_position_size),
            max_total_positions: limits
                .get_decimal("max_total_positions", defaults.max_total_positions),
            max_leverage: limits.get_u64("max_leverage", defaults.max_leverage as u64) as u32,
            max_drawdown: limits.get_decimal("max_drawdown", defaults.max_drawdown),
            max_daily_loss: limits.get_decimal("max_daily_loss", defaults.max_daily_loss),
            max_hourly_loss: limits.get_decimal("max_hourly_loss", defaults.max_hourly_loss),
            min_margin_ratio: limits.get_decimal("min_margin_ratio", defaults.min_margin_ratio),
            max_funding_exposure: limits
                .get_decimal("max_funding_exposure", defaults.max_funding_exposure),
            max_trades_per_hour: limits
                .get_u64("max_trades_per_hour", defaults.max_trades_per_hour as u64)
                as u32,
            max_volatility: limits.get_decimal("max_volatility", defaults.max_volatility),
            default_leverage: limits.get_u64("default_leverage", defaults.default_leverage as u64)
                as u32,
        }
    }
}

/// Automated response configuration.
#[derive(Debug, Clone)]
pub struct RiskControlSettings {
    /// Place reduce-only orders when de-risking triggers.
    pub auto_reduce_position: bool,
    /// Halve leverage (down to 1) when de-risking triggers.
    pub auto_adjust_leverage: bool,
    /// Fraction of the position shed per emergency reduction.
    pub position_reduction_ratio: Decimal,
}

impl Default for RiskControlSettings {
    fn default() -> Self {
        Self {
            auto_reduce_position: true,
            auto_adjust_leverage: true,
            position_reduction_ratio: dec!(0.5),
        }
    }
}

impl RiskControlSettings {
    /// Load settings from the `risk.control` config block.
    pub fn from_config(tree: &ConfigTree) -> Self {
        let control = tree.sub("risk.control");
        let defaults = Self::default();

        Self {
            auto_reduce_position: control
                .get_bool("auto_reduce_position", defaults.auto_reduce_position),
            auto_adjust_leverage: control
                .get_bool("auto_adjust_leverage", defaults.auto_adjust_leverage),
            position_reduction_ratio: control
                .get_decimal("position_reduction_ratio", defaults.position_reduction_ratio),
        }
    }
}

/// Rolling aggregates recomputed on fills and ticks.
#[derive(Debug, Clone, Default)]
pub struct RiskMetrics {
    pub total_exposure: Decimal,
    pub largest_position: Decimal,
    pub hourly_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub current_drawdown: Decimal,
    pub max_drawdown: Decimal,
    pub peak_equity: Decimal,
    pub hourly_trade_count: u32,
    pub last_update_ms: i64,
}

/// Kinds of limit breaches and warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskEventType {
    MarginCall,
    LiquidationWarning,
    DrawdownLimitBreach,
    DailyLossLimitBreach,
    PositionLimitBreach,
    HighVolatility,
    FundingRateWarning,
    TradeFrequencyWarning,
}

impl RiskEventType {
    pub fn message(&self) -> &'static str {
        match self {
            Self::MarginCall => "margin ratio below minimum requirement",
            Self::LiquidationWarning => "position approaching liquidation price",
            Self::DrawdownLimitBreach => "drawdown limit exceeded",
            Self::DailyLossLimitBreach => "loss limit exceeded",
            Self::PositionLimitBreach => "position limit exceeded",
            Self::HighVolatility => "market volatility above threshold",
            Self::FundingRateWarning => "funding exposure above threshold",
            Self::TradeFrequencyWarning => "trade frequency above threshold",
        }
    }
}

/// One recorded breach; retained for 24 hours.
#[derive(Debug, Clone)]
pub struct RiskEvent {
    pub event_type: RiskEventType,
    pub symbol: String,
    pub message: String,
    pub current_value: Decimal,
    pub threshold_value: Decimal,
    pub time_ms: i64,
}

/// Per-symbol risk report with recent events and recommendations.
#[derive(Debug, Clone)]
pub struct RiskReport {
    pub symbol: String,
    pub metrics: RiskMetrics,
    pub recent_events: Vec<RiskEvent>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub report_time_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_from_config() {
        let tree = ConfigTree::from_pairs([
            ("risk.limits.max_position_size", "2.5"),
            ("risk.limits.max_trades_per_hour", "10"),
        ]);

        let limits = RiskLimits::from_config(&tree);
        assert_eq!(limits.max_position_size, dec!(2.5));
        assert_eq!(limits.max_trades_per_hour, 10);
        // Unset keys fall back to defaults
        assert_eq!(limits.max_drawdown, dec!(0.1));
    }

    #[test]
    fn test_control_settings_from_config() {
        let tree = ConfigTree::from_pairs([
            ("risk.control.auto_reduce_position", "false"),
            ("risk.control.position_reduction_ratio", "0.25"),
        ]);

        let settings = RiskControlSettings::from_config(&tree);
        assert!(!settings.auto_reduce_position);
        assert!(settings.auto_adjust_leverage);
        assert_eq!(settings.position_reduction_ratio, dec!(0.25));
    }
}
