//! Instrument snapshots, order book depth and pair state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One price level of an order book, from best inward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Decimal,
    pub qty: Decimal,
}

impl DepthLevel {
    pub fn new(price: Decimal, qty: Decimal) -> Self {
        Self { price, qty }
    }

    pub fn notional(&self) -> Decimal {
        self.price * self.qty
    }
}

/// A recent public trade, used for market-impact estimation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecentTrade {
    pub price: Decimal,
    pub qty: Decimal,
    pub time_ms: i64,
}

/// Per-symbol market view assembled freshly each control tick.
///
/// Never mutated after construction; the strategy reads a whole tick from
/// one consistent set of snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSnapshot {
    pub symbol: String,
    pub spot_price: Decimal,
    pub futures_price: Decimal,
    /// Last funding rate, a signed fraction.
    pub funding_rate: Decimal,
    pub next_funding_time_ms: i64,
    /// 24h base-asset volume.
    pub volume_24h: Decimal,
    /// Best ask minus best bid on the futures book.
    pub bid_ask_spread: Decimal,
    /// (futures - spot) / spot.
    pub basis: Decimal,
    /// Derived score in [0, 1].
    pub liquidity_score: Decimal,
}

impl InstrumentSnapshot {
    /// Assemble a snapshot, computing the basis from the two prices.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        spot_price: Decimal,
        futures_price: Decimal,
        funding_rate: Decimal,
        next_funding_time_ms: i64,
        volume_24h: Decimal,
        bid_ask_spread: Decimal,
        liquidity_score: Decimal,
    ) -> Self {
        let basis = if spot_price > Decimal::ZERO {
            (futures_price - spot_price) / spot_price
        } else {
            Decimal::ZERO
        };

        Self {
            symbol: symbol.into(),
            spot_price,
            futures_price,
            funding_rate,
            next_funding_time_ms,
            volume_24h,
            bid_ask_spread,
            basis,
            liquidity_score: liquidity_score.clamp(Decimal::ZERO, Decimal::ONE),
        }
    }

    /// Minutes until the next funding settlement (negative once past).
    pub fn minutes_to_funding(&self, now_ms: i64) -> i64 {
        (self.next_funding_time_ms - now_ms) / 60_000
    }

    /// In the pre-funding window iff `0 < time_to_funding <= window_minutes`.
    pub fn in_funding_window(&self, now_ms: i64, window_minutes: i64) -> bool {
        let remaining_ms = self.next_funding_time_ms - now_ms;
        remaining_ms > 0 && remaining_ms <= window_minutes * 60_000
    }
}

/// State of one open spot/futures pair, owned exclusively by the strategy
/// engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairState {
    pub symbol: String,
    /// Spot leg size (signed).
    pub spot_size: Decimal,
    /// Futures leg size (signed).
    pub futures_size: Decimal,
    /// Basis observed at open.
    pub entry_basis: Decimal,
    pub entry_spot_price: Decimal,
    pub entry_futures_price: Decimal,
    pub opened_at_ms: i64,
    /// The funding settlement this pair is held across.
    pub target_funding_time_ms: i64,
}

impl PairState {
    /// Net imbalance between the legs: |spot + futures|.
    pub fn imbalance(&self) -> Decimal {
        (self.spot_size + self.futures_size).abs()
    }

    /// Whether the legs net out to within `tolerance`.
    pub fn is_balanced(&self, tolerance: Decimal) -> bool {
        self.imbalance() <= tolerance
    }

    /// Mark-to-market PnL of both legs.
    pub fn unrealized_pnl(&self, spot_price: Decimal, futures_price: Decimal) -> Decimal {
        let spot_pnl = (spot_price - self.entry_spot_price) * self.spot_size;
        let futures_pnl = (futures_price - self.entry_futures_price) * self.futures_size;
        spot_pnl + futures_pnl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(next_funding_time_ms: i64) -> InstrumentSnapshot {
        InstrumentSnapshot::new(
            "BTCUSDT",
            dec!(50000),
            dec!(50050),
            dec!(0.0010),
            next_funding_time_ms,
            dec!(10000000),
            dec!(5),
            dec!(0.9),
        )
    }

    #[test]
    fn test_basis_computed() {
        let snap = snapshot(0);
        assert_eq!(snap.basis, dec!(0.001));
    }

    #[test]
    fn test_window_boundaries() {
        let window_min = 60i64;
        let now_ms = 1_000_000_000;

        // Exactly at the window edge counts as in-window
        let at_edge = snapshot(now_ms + window_min * 60_000);
        assert!(at_edge.in_funding_window(now_ms, window_min));

        // One millisecond past the edge is out
        let past_edge = snapshot(now_ms + window_min * 60_000 + 1);
        assert!(!past_edge.in_funding_window(now_ms, window_min));

        // Zero time remaining is out of window
        let at_funding = snapshot(now_ms);
        assert!(!at_funding.in_funding_window(now_ms, window_min));

        // Already settled is out
        let settled = snapshot(now_ms - 1);
        assert!(!settled.in_funding_window(now_ms, window_min));
    }

    #[test]
    fn test_liquidity_score_clamped() {
        let snap = InstrumentSnapshot::new(
            "ETHUSDT",
            dec!(3000),
            dec!(3003),
            dec!(0.0001),
            0,
            dec!(1000),
            dec!(1),
            dec!(1.7),
        );
        assert_eq!(snap.liquidity_score, dec!(1));
    }

    #[test]
    fn test_pair_imbalance() {
        let pair = PairState {
            symbol: "BTCUSDT".into(),
            spot_size: dec!(0.01),
            futures_size: dec!(-0.007),
            entry_basis: dec!(0.001),
            entry_spot_price: dec!(50000),
            entry_futures_price: dec!(50050),
            opened_at_ms: 0,
            target_funding_time_ms: 0,
        };

        assert_eq!(pair.imbalance(), dec!(0.003));
        assert!(pair.is_balanced(dec!(0.01)));
        assert!(!pair.is_balanced(dec!(0.001)));
    }

    #[test]
    fn test_pair_unrealized_pnl() {
        let pair = PairState {
            symbol: "BTCUSDT".into(),
            spot_size: dec!(1),
            futures_size: dec!(-1),
            entry_basis: dec!(0.001),
            entry_spot_price: dec!(50000),
            entry_futures_price: dec!(50050),
            opened_at_ms: 0,
            target_funding_time_ms: 0,
        };

        // Spot gains 100, futures short loses 50: net +50
        let pnl = pair.unrealized_pnl(dec!(50100), dec!(50100));
        assert_eq!(pnl, dec!(50));
    }
}
