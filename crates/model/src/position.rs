//! Position records.

use crate::order::MarginType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A position on one symbol as reported by the exchange.
///
/// `size` is signed: positive = long, negative = short. The liquidation
/// price, when set, sits strictly on the adverse side of the entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub symbol: String,
    /// Signed quantity (positive = long, negative = short).
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    /// Zero when the venue reports no liquidation price (e.g. spot legs).
    pub liquidation_price: Decimal,
    pub margin: Decimal,
    pub leverage: u32,
    pub margin_type: MarginType,
    /// True for balances held on the spot surface.
    pub is_spot: bool,
    pub updated_at_ms: i64,
}

impl PositionRecord {
    /// Empty (flat) position for a symbol.
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            size: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            mark_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            liquidation_price: Decimal::ZERO,
            margin: Decimal::ZERO,
            leverage: 1,
            margin_type: MarginType::Isolated,
            is_spot: false,
            updated_at_ms: 0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.size == Decimal::ZERO
    }

    pub fn is_long(&self) -> bool {
        self.size > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.size < Decimal::ZERO
    }

    pub fn abs_size(&self) -> Decimal {
        self.size.abs()
    }

    /// Notional value at the current mark.
    pub fn notional(&self) -> Decimal {
        self.abs_size() * self.mark_price
    }

    /// margin / notional, zero when flat.
    pub fn margin_ratio(&self) -> Decimal {
        let notional = self.notional();
        if notional == Decimal::ZERO {
            Decimal::ZERO
        } else {
            self.margin / notional
        }
    }

    /// Relative distance from the mark to the liquidation price,
    /// None when the venue reports no liquidation price.
    pub fn liquidation_distance(&self) -> Option<Decimal> {
        if self.liquidation_price <= Decimal::ZERO || self.mark_price <= Decimal::ZERO {
            return None;
        }
        Some((self.mark_price - self.liquidation_price).abs() / self.mark_price)
    }

    /// Liquidation must sit on the adverse side of entry: below for longs,
    /// above for shorts.
    pub fn liquidation_side_ok(&self) -> bool {
        if self.liquidation_price <= Decimal::ZERO || self.is_flat() {
            return true;
        }
        if self.is_long() {
            self.liquidation_price < self.entry_price
        } else {
            self.liquidation_price > self.entry_price
        }
    }
}
