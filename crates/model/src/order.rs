//! Order types, status enums and wire-string codecs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Convert from the exchange string representation.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }

    /// Convert to the exchange string representation.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    /// The side that unwinds this one.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    PostOnly,
    StopMarket,
    StopLimit,
    TakeProfit,
    /// Emitted by the exchange on forced closes; never placed by the core.
    Liquidation,
}

impl OrderType {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "MARKET" => Some(Self::Market),
            "LIMIT" => Some(Self::Limit),
            "POST_ONLY" => Some(Self::PostOnly),
            "STOP_MARKET" => Some(Self::StopMarket),
            "STOP_LIMIT" => Some(Self::StopLimit),
            "TAKE_PROFIT" => Some(Self::TakeProfit),
            "LIQUIDATION" => Some(Self::Liquidation),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::PostOnly => "POST_ONLY",
            Self::StopMarket => "STOP_MARKET",
            Self::StopLimit => "STOP_LIMIT",
            Self::TakeProfit => "TAKE_PROFIT",
            Self::Liquidation => "LIQUIDATION",
        }
    }

    /// Whether this type requires a limit price.
    pub fn requires_price(&self) -> bool {
        !matches!(self, Self::Market | Self::StopMarket | Self::Liquidation)
    }
}

/// Order status.
///
/// Transitions form a DAG: NEW fans out to every other state,
/// PARTIALLY_FILLED can still fill, cancel or enter PENDING_CANCEL, and
/// FILLED / CANCELED / REJECTED / EXPIRED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    PendingCancel,
}

impl OrderStatus {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(Self::New),
            "PARTIALLY_FILLED" => Some(Self::PartiallyFilled),
            "FILLED" => Some(Self::Filled),
            "CANCELED" => Some(Self::Canceled),
            "REJECTED" => Some(Self::Rejected),
            "EXPIRED" => Some(Self::Expired),
            "PENDING_CANCEL" => Some(Self::PendingCancel),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
            Self::PendingCancel => "PENDING_CANCEL",
        }
    }

    /// Check if this is a terminal status (order is done).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired
        )
    }

    /// Check if the order is still active/open.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled | Self::PendingCancel)
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match self {
            Self::New => matches!(
                next,
                Self::PartiallyFilled
                    | Self::Filled
                    | Self::Canceled
                    | Self::Rejected
                    | Self::Expired
            ),
            Self::PartiallyFilled => matches!(
                next,
                Self::Filled | Self::Canceled | Self::PendingCancel | Self::PartiallyFilled
            ),
            Self::PendingCancel => matches!(next, Self::Canceled | Self::Filled),
            // Terminal states go nowhere
            _ => false,
        }
    }
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good Till Canceled.
    GTC,
    /// Immediate Or Cancel.
    IOC,
    /// Fill Or Kill.
    FOK,
    /// Good Till Crossing (post-only on the futures surface).
    GTX,
}

impl TimeInForce {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "GTC" => Some(Self::GTC),
            "IOC" => Some(Self::IOC),
            "FOK" => Some(Self::FOK),
            "GTX" => Some(Self::GTX),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::GTC => "GTC",
            Self::IOC => "IOC",
            Self::FOK => "FOK",
            Self::GTX => "GTX",
        }
    }
}

/// Position side for hedged accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PositionSide {
    Long,
    Short,
    #[default]
    Both,
}

impl PositionSide {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "LONG" => Some(Self::Long),
            "SHORT" => Some(Self::Short),
            "BOTH" => Some(Self::Both),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
            Self::Both => "BOTH",
        }
    }
}

/// Margin mode for a futures position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MarginType {
    #[default]
    Isolated,
    Cross,
}

impl MarginType {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "ISOLATED" => Some(Self::Isolated),
            "CROSS" | "CROSSED" => Some(Self::Cross),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Isolated => "ISOLATED",
            Self::Cross => "CROSS",
        }
    }
}

/// A request to place an order, before the exchange has seen it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Limit price (required when the type is not MARKET).
    pub price: Option<Decimal>,
    /// Trigger price for stop / take-profit types.
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub reduce_only: bool,
    pub close_position: bool,
    pub position_side: PositionSide,
    pub margin_type: MarginType,
    /// Routes to the spot surface when true, perpetual futures otherwise.
    pub is_spot: bool,
    /// Free-form venue-specific parameters appended to the request.
    pub extra_params: BTreeMap<String, String>,
}

impl OrderRequest {
    /// Market order on the futures surface.
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: TimeInForce::GTC,
            reduce_only: false,
            close_position: false,
            position_side: PositionSide::Both,
            margin_type: MarginType::Isolated,
            is_spot: false,
            extra_params: BTreeMap::new(),
        }
    }

    /// Limit order on the futures surface.
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            price: Some(price),
            order_type: OrderType::Limit,
            ..Self::market(symbol, side, quantity)
        }
    }

    /// Route this request to the spot surface.
    pub fn spot(mut self) -> Self {
        self.is_spot = true;
        self
    }

    /// Mark this request reduce-only.
    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    /// Notional value at `reference_price`.
    pub fn notional(&self, reference_price: Decimal) -> Decimal {
        self.quantity * reference_price
    }
}

/// An order as tracked after placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Exchange-assigned order id.
    pub order_id: u64,
    /// Client-generated id used for correlation.
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub position_side: PositionSide,
    pub margin_type: MarginType,
    pub is_spot: bool,
    /// Originally requested quantity.
    pub original_qty: Decimal,
    /// Quantity executed so far.
    pub executed_qty: Decimal,
    pub price: Option<Decimal>,
    /// Volume-weighted average fill price (None before the first fill).
    pub avg_fill_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub commission: Decimal,
    pub commission_asset: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl OrderRecord {
    /// Build the initial record for a just-placed request.
    pub fn from_request(request: &OrderRequest, order_id: u64, client_order_id: String, now_ms: i64) -> Self {
        Self {
            order_id,
            client_order_id,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            status: OrderStatus::New,
            position_side: request.position_side,
            margin_type: request.margin_type,
            is_spot: request.is_spot,
            original_qty: request.quantity,
            executed_qty: Decimal::ZERO,
            price: request.price,
            avg_fill_price: None,
            stop_price: request.stop_price,
            commission: Decimal::ZERO,
            commission_asset: String::new(),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Remaining quantity: original minus executed.
    pub fn remaining_qty(&self) -> Decimal {
        self.original_qty - self.executed_qty
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_round_trip() {
        for side in [OrderSide::Buy, OrderSide::Sell] {
            assert_eq!(OrderSide::from_wire(side.as_wire()), Some(side));
        }
        assert_eq!(OrderSide::from_wire("HOLD"), None);
    }

    #[test]
    fn test_order_type_round_trip() {
        for ty in [
            OrderType::Market,
            OrderType::Limit,
            OrderType::PostOnly,
            OrderType::StopMarket,
            OrderType::StopLimit,
            OrderType::TakeProfit,
            OrderType::Liquidation,
        ] {
            assert_eq!(OrderType::from_wire(ty.as_wire()), Some(ty));
        }
        assert_eq!(OrderType::from_wire("ICEBERG"), None);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            OrderStatus::New,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
            OrderStatus::PendingCancel,
        ] {
            assert_eq!(OrderStatus::from_wire(status.as_wire()), Some(status));
        }
        assert_eq!(OrderStatus::from_wire("DONE"), None);
    }

    #[test]
    fn test_tif_round_trip() {
        for tif in [
            TimeInForce::GTC,
            TimeInForce::IOC,
            TimeInForce::FOK,
            TimeInForce::GTX,
        ] {
            assert_eq!(TimeInForce::from_wire(tif.as_wire()), Some(tif));
        }
        assert_eq!(TimeInForce::from_wire("GTD"), None);
    }

    #[test]
    fn test_position_side_and_margin_round_trip() {
        for side in [PositionSide::Long, PositionSide::Short, PositionSide::Both] {
            assert_eq!(PositionSide::from_wire(side.as_wire()), Some(side));
        }
        for margin in [MarginType::Isolated, MarginType::Cross] {
            assert_eq!(MarginType::from_wire(margin.as_wire()), Some(margin));
        }
        assert_eq!(PositionSide::from_wire("HEDGE"), None);
        assert_eq!(MarginType::from_wire("PORTFOLIO"), None);
    }

    #[test]
    fn test_status_terminal_and_active() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());

        assert!(OrderStatus::New.is_active());
        assert!(OrderStatus::PartiallyFilled.is_active());
        assert!(OrderStatus::PendingCancel.is_active());
        assert!(!OrderStatus::Filled.is_active());
    }

    #[test]
    fn test_status_transition_dag() {
        use OrderStatus::*;

        assert!(New.can_transition_to(PartiallyFilled));
        assert!(New.can_transition_to(Filled));
        assert!(New.can_transition_to(Canceled));
        assert!(New.can_transition_to(Rejected));
        assert!(New.can_transition_to(Expired));

        assert!(PartiallyFilled.can_transition_to(Filled));
        assert!(PartiallyFilled.can_transition_to(Canceled));
        assert!(PartiallyFilled.can_transition_to(PendingCancel));

        // Terminal states are sinks
        for terminal in [Filled, Canceled, Rejected, Expired] {
            for next in [New, PartiallyFilled, Filled, Canceled, PendingCancel] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_record_remaining_qty() {
        let request = OrderRequest::limit("BTCUSDT", OrderSide::Buy, dec!(1), dec!(50000));
        let mut record = OrderRecord::from_request(&request, 42, "c1".into(), 1000);

        assert_eq!(record.remaining_qty(), dec!(1));

        record.executed_qty = dec!(0.3);
        assert_eq!(record.remaining_qty(), dec!(0.7));

        record.executed_qty = dec!(1);
        assert_eq!(record.remaining_qty(), dec!(0));
    }

    #[test]
    fn test_request_builders() {
        let request = OrderRequest::market("ETHUSDT", OrderSide::Sell, dec!(2))
            .spot()
            .reduce_only();

        assert!(request.is_spot);
        assert!(request.reduce_only);
        assert_eq!(request.notional(dec!(3000)), dec!(6000));
    }

    #[test]
    fn test_requires_price() {
        assert!(!OrderType::Market.requires_price());
        assert!(!OrderType::StopMarket.requires_price());
        assert!(OrderType::Limit.requires_price());
        assert!(OrderType::PostOnly.requires_price());
        assert!(OrderType::StopLimit.requires_price());
    }
}
