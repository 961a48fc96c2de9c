//! Prometheus text exposition rendering.

use crate::service::MonitorSnapshot;
use std::fmt::Write;

/// Render a snapshot in the Prometheus text format.
///
/// Families:
/// - `trading_system_metrics{type="memory_usage"|"cpu_usage"}` (gauge)
/// - `trading_position_metrics{type="position_size"|"unrealized_pnl",symbol=..}` (gauge)
/// - `trading_cumulative_metrics{type="total_trades"|"funding_earned"}` (counter)
pub fn render_metrics(snapshot: &MonitorSnapshot) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# HELP trading_system_metrics Process resource usage");
    let _ = writeln!(out, "# TYPE trading_system_metrics gauge");
    let _ = writeln!(
        out,
        "trading_system_metrics{{type=\"memory_usage\"}} {}",
        snapshot.memory_usage_mb
    );
    let _ = writeln!(
        out,
        "trading_system_metrics{{type=\"cpu_usage\"}} {}",
        snapshot.cpu_usage_pct
    );

    let _ = writeln!(out, "# HELP trading_position_metrics Per-symbol position state");
    let _ = writeln!(out, "# TYPE trading_position_metrics gauge");
    for position in &snapshot.positions {
        let _ = writeln!(
            out,
            "trading_position_metrics{{type=\"position_size\",symbol=\"{}\"}} {}",
            position.symbol, position.position_size
        );
        let _ = writeln!(
            out,
            "trading_position_metrics{{type=\"unrealized_pnl\",symbol=\"{}\"}} {}",
            position.symbol, position.unrealized_pnl
        );
    }

    let _ = writeln!(out, "# HELP trading_cumulative_metrics Lifetime totals");
    let _ = writeln!(out, "# TYPE trading_cumulative_metrics counter");
    let _ = writeln!(
        out,
        "trading_cumulative_metrics{{type=\"total_trades\"}} {}",
        snapshot.total_trades
    );
    let _ = writeln!(
        out,
        "trading_cumulative_metrics{{type=\"funding_earned\"}} {}",
        snapshot.funding_earned
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::PositionMetrics;
    use rust_decimal_macros::dec;

    #[test]
    fn test_render_family_lines() {
        let snapshot = MonitorSnapshot {
            memory_usage_mb: 128.5,
            cpu_usage_pct: 3.25,
            positions: vec![PositionMetrics {
                symbol: "BTCUSDT".into(),
                position_size: dec!(0.02),
                unrealized_pnl: dec!(-1.5),
                distance_to_liquidation: None,
            }],
            total_trades: 7,
            funding_earned: dec!(12.75),
            ..MonitorSnapshot::default()
        };

        let text = render_metrics(&snapshot);

        assert!(text.contains("trading_system_metrics{type=\"memory_usage\"} 128.5"));
        assert!(text.contains("trading_system_metrics{type=\"cpu_usage\"} 3.25"));
        assert!(text
            .contains("trading_position_metrics{type=\"position_size\",symbol=\"BTCUSDT\"} 0.02"));
        assert!(text
            .contains("trading_position_metrics{type=\"unrealized_pnl\",symbol=\"BTCUSDT\"} -1.5"));
        assert!(text.contains("trading_cumulative_metrics{type=\"total_trades\"} 7"));
        assert!(text.contains("trading_cumulative_metrics{type=\"funding_earned\"} 12.75"));
    }

    #[test]
    fn test_render_type_headers() {
        let text = render_metrics(&MonitorSnapshot::default());
        assert!(text.contains("# TYPE trading_system_metrics gauge"));
        assert!(text.contains("# TYPE trading_position_metrics gauge"));
        assert!(text.contains("# TYPE trading_cumulative_metrics counter"));
    }
}
