//! Stream message parsing.
//!
//! Market streams arrive as combined-stream frames with a top-level
//! `stream` and `data`; channels are matched by suffix (`@markPrice`,
//! `@fundingRate`, `@bookTicker`). User-data events arrive as raw frames
//! keyed by their `e` field.

use exchange_core::{
    AccountBalance, BookTickerEvent, FundingRateEvent, MarkPriceEvent, StreamEvent,
};
use model::{
    MarginType, OrderRecord, OrderSide, OrderStatus, OrderType, PositionRecord, PositionSide,
    TimeInForce,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed stream message: {0}")]
    Malformed(String),

    #[error("unknown wire value for {field}: '{value}'")]
    UnknownValue { field: String, value: String },
}

fn unknown(field: &str, value: &str) -> ParseError {
    ParseError::UnknownValue {
        field: field.into(),
        value: value.into(),
    }
}

#[derive(Debug, Deserialize)]
struct CombinedFrame {
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MarkPriceData {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    mark_price: Decimal,
    #[serde(rename = "E", default)]
    event_time: i64,
}

#[derive(Debug, Deserialize)]
struct FundingRateData {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "r")]
    funding_rate: Decimal,
    #[serde(rename = "T", default)]
    next_funding_time: i64,
    #[serde(rename = "E", default)]
    event_time: i64,
}

#[derive(Debug, Deserialize)]
struct BookTickerData {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bid_price: Decimal,
    #[serde(rename = "B")]
    bid_qty: Decimal,
    #[serde(rename = "a")]
    ask_price: Decimal,
    #[serde(rename = "A")]
    ask_qty: Decimal,
    #[serde(rename = "E", default)]
    event_time: i64,
}

#[derive(Debug, Deserialize)]
struct OrderUpdateFrame {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "o")]
    order: OrderUpdateData,
}

#[derive(Debug, Deserialize)]
struct OrderUpdateData {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    client_order_id: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "o")]
    order_type: String,
    #[serde(rename = "f", default)]
    time_in_force: Option<String>,
    #[serde(rename = "q")]
    quantity: Decimal,
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "sp", default)]
    stop_price: Option<Decimal>,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "i")]
    order_id: u64,
    #[serde(rename = "z")]
    cumulative_filled_qty: Decimal,
    #[serde(rename = "ap", default)]
    avg_price: Option<Decimal>,
    #[serde(rename = "n", default)]
    commission: Option<Decimal>,
    #[serde(rename = "N", default)]
    commission_asset: Option<String>,
    #[serde(rename = "ps", default)]
    position_side: Option<String>,
    #[serde(rename = "T", default)]
    trade_time: i64,
}

#[derive(Debug, Deserialize)]
struct AccountUpdateFrame {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "a")]
    account: AccountUpdateData,
}

#[derive(Debug, Deserialize)]
struct AccountUpdateData {
    #[serde(rename = "B", default)]
    balances: Vec<BalanceData>,
    #[serde(rename = "P", default)]
    positions: Vec<PositionData>,
}

#[derive(Debug, Deserialize)]
struct BalanceData {
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "wb")]
    wallet_balance: Decimal,
    #[serde(rename = "cw", default)]
    cross_wallet_balance: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct PositionData {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "pa")]
    position_amt: Decimal,
    #[serde(rename = "ep")]
    entry_price: Decimal,
    #[serde(rename = "up", default)]
    unrealized_pnl: Decimal,
    #[serde(rename = "mt", default)]
    margin_type: Option<String>,
    #[serde(rename = "iw", default)]
    isolated_wallet: Decimal,
}

/// Parse one WebSocket text frame into zero or more stream events.
///
/// Subscription confirmations and unknown payloads yield an empty vec.
pub(crate) fn parse_message(text: &str) -> Result<Vec<StreamEvent>, ParseError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ParseError::Malformed(e.to_string()))?;

    // Combined-stream frame: route by channel suffix.
    if value.get("stream").is_some() {
        let frame: CombinedFrame =
            serde_json::from_value(value).map_err(|e| ParseError::Malformed(e.to_string()))?;
        return parse_stream_data(&frame.stream, frame.data);
    }

    // Subscription ack: {"result": null, "id": n}
    if value.get("id").is_some() {
        return Ok(Vec::new());
    }

    // Raw user-data frame keyed by event type.
    match value.get("e").and_then(|e| e.as_str()) {
        Some("ORDER_TRADE_UPDATE") | Some("executionReport") => {
            let frame: OrderUpdateFrame =
                serde_json::from_value(value).map_err(|e| ParseError::Malformed(e.to_string()))?;
            Ok(vec![StreamEvent::OrderUpdate(order_record(frame)?)])
        }
        Some("ACCOUNT_UPDATE") => {
            let frame: AccountUpdateFrame =
                serde_json::from_value(value).map_err(|e| ParseError::Malformed(e.to_string()))?;
            Ok(account_events(frame))
        }
        _ => Ok(Vec::new()),
    }
}

fn parse_stream_data(
    stream: &str,
    data: serde_json::Value,
) -> Result<Vec<StreamEvent>, ParseError> {
    if stream.ends_with("@markPrice") {
        let data: MarkPriceData =
            serde_json::from_value(data).map_err(|e| ParseError::Malformed(e.to_string()))?;
        Ok(vec![StreamEvent::MarkPrice(MarkPriceEvent {
            symbol: data.symbol,
            mark_price: data.mark_price,
            event_time_ms: data.event_time,
        })])
    } else if stream.ends_with("@fundingRate") {
        let data: FundingRateData =
            serde_json::from_value(data).map_err(|e| ParseError::Malformed(e.to_string()))?;
        Ok(vec![StreamEvent::FundingRate(FundingRateEvent {
            symbol: data.symbol,
            funding_rate: data.funding_rate,
            next_funding_time_ms: data.next_funding_time,
            event_time_ms: data.event_time,
        })])
    } else if stream.ends_with("@bookTicker") {
        let data: BookTickerData =
            serde_json::from_value(data).map_err(|e| ParseError::Malformed(e.to_string()))?;
        Ok(vec![StreamEvent::BookTicker(BookTickerEvent {
            symbol: data.symbol,
            bid_price: data.bid_price,
            bid_qty: data.bid_qty,
            ask_price: data.ask_price,
            ask_qty: data.ask_qty,
            event_time_ms: data.event_time,
        })])
    } else {
        Ok(Vec::new())
    }
}

fn order_record(frame: OrderUpdateFrame) -> Result<OrderRecord, ParseError> {
    let o = frame.order;

    let side = OrderSide::from_wire(&o.side).ok_or_else(|| unknown("order side", &o.side))?;
    let status =
        OrderStatus::from_wire(&o.status).ok_or_else(|| unknown("order status", &o.status))?;
    let order_type = match o.order_type.as_str() {
        "LIMIT_MAKER" => OrderType::PostOnly,
        "STOP" => OrderType::StopLimit,
        "TAKE_PROFIT_MARKET" => OrderType::TakeProfit,
        other => OrderType::from_wire(other).ok_or_else(|| unknown("order type", other))?,
    };
    let position_side = match o.position_side.as_deref() {
        Some(s) => PositionSide::from_wire(s).ok_or_else(|| unknown("position side", s))?,
        None => PositionSide::Both,
    };
    let _time_in_force = match o.time_in_force.as_deref() {
        Some(s) if !s.is_empty() => {
            Some(TimeInForce::from_wire(s).ok_or_else(|| unknown("time in force", s))?)
        }
        _ => None,
    };

    Ok(OrderRecord {
        order_id: o.order_id,
        client_order_id: o.client_order_id,
        symbol: o.symbol,
        side,
        order_type,
        status,
        position_side,
        margin_type: MarginType::Isolated,
        is_spot: false,
        original_qty: o.quantity,
        executed_qty: o.cumulative_filled_qty,
        price: Some(o.price).filter(|p| *p > Decimal::ZERO),
        avg_fill_price: o.avg_price.filter(|p| *p > Decimal::ZERO),
        stop_price: o.stop_price.filter(|p| *p > Decimal::ZERO),
        commission: o.commission.unwrap_or(Decimal::ZERO),
        commission_asset: o.commission_asset.unwrap_or_default(),
        created_at_ms: o.trade_time,
        updated_at_ms: frame.event_time,
    })
}

fn account_events(frame: AccountUpdateFrame) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    if !frame.account.balances.is_empty() {
        let balances = frame
            .account
            .balances
            .iter()
            .map(|b| AccountBalance {
                asset: b.asset.clone(),
                free: b.cross_wallet_balance.unwrap_or(b.wallet_balance),
                locked: Decimal::ZERO,
            })
            .collect();
        events.push(StreamEvent::AccountUpdate(balances));
    }

    for p in frame.account.positions {
        let margin_type = p
            .margin_type
            .as_deref()
            .and_then(|s| MarginType::from_wire(&s.to_uppercase()))
            .unwrap_or_default();

        events.push(StreamEvent::PositionUpdate(PositionRecord {
            symbol: p.symbol,
            size: p.position_amt,
            entry_price: p.entry_price,
            mark_price: Decimal::ZERO,
            unrealized_pnl: p.unrealized_pnl,
            liquidation_price: Decimal::ZERO,
            margin: p.isolated_wallet,
            leverage: 1,
            margin_type,
            is_spot: false,
            updated_at_ms: frame.event_time,
        }));
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_mark_price_frame() {
        let text = r#"{
            "stream": "btcusdt@markPrice",
            "data": {"e": "markPriceUpdate", "E": 1700000000000, "s": "BTCUSDT", "p": "50050.00", "r": "0.00100000", "T": 1700003600000}
        }"#;

        let events = parse_message(text).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::MarkPrice(e) => {
                assert_eq!(e.symbol, "BTCUSDT");
                assert_eq!(e.mark_price, dec!(50050));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_funding_rate_frame() {
        let text = r#"{
            "stream": "ethusdt@fundingRate",
            "data": {"E": 1700000000000, "s": "ETHUSDT", "r": "-0.00020000", "T": 1700003600000}
        }"#;

        let events = parse_message(text).unwrap();
        match &events[0] {
            StreamEvent::FundingRate(e) => {
                assert_eq!(e.funding_rate, dec!(-0.0002));
                assert_eq!(e.next_funding_time_ms, 1700003600000);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_book_ticker_frame() {
        let text = r#"{
            "stream": "btcusdt@bookTicker",
            "data": {"E": 1, "s": "BTCUSDT", "b": "50000", "B": "2", "a": "50005", "A": "1"}
        }"#;

        let events = parse_message(text).unwrap();
        match &events[0] {
            StreamEvent::BookTicker(e) => {
                assert_eq!(e.bid_price, dec!(50000));
                assert_eq!(e.ask_qty, dec!(1));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_order_update_frame() {
        let text = r#"{
            "e": "ORDER_TRADE_UPDATE",
            "E": 1700000001000,
            "o": {
                "s": "BTCUSDT", "c": "fa-1", "S": "BUY", "o": "LIMIT", "f": "GTC",
                "q": "0.010", "p": "50050", "X": "PARTIALLY_FILLED", "i": 42,
                "l": "0.004", "z": "0.004", "L": "50049", "ap": "50049",
                "n": "0.01", "N": "USDT", "T": 1700000000900, "ps": "BOTH"
            }
        }"#;

        let events = parse_message(text).unwrap();
        match &events[0] {
            StreamEvent::OrderUpdate(record) => {
                assert_eq!(record.order_id, 42);
                assert_eq!(record.status, OrderStatus::PartiallyFilled);
                assert_eq!(record.executed_qty, dec!(0.004));
                assert_eq!(record.remaining_qty(), dec!(0.006));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_account_update_frame() {
        let text = r#"{
            "e": "ACCOUNT_UPDATE",
            "E": 1700000002000,
            "a": {
                "B": [{"a": "USDT", "wb": "10000.0", "cw": "9500.0"}],
                "P": [{"s": "BTCUSDT", "pa": "-0.010", "ep": "50050", "up": "-0.5", "mt": "isolated", "iw": "50"}]
            }
        }"#;

        let events = parse_message(text).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::AccountUpdate(_)));
        match &events[1] {
            StreamEvent::PositionUpdate(p) => {
                assert_eq!(p.size, dec!(-0.010));
                assert_eq!(p.margin_type, MarginType::Isolated);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_subscription_ack_ignored() {
        let events = parse_message(r#"{"result": null, "id": 7}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_unknown_status_rejected() {
        let text = r#"{
            "e": "ORDER_TRADE_UPDATE",
            "E": 1,
            "o": {"s": "X", "c": "c", "S": "BUY", "o": "LIMIT", "q": "1", "p": "1", "X": "FROZEN", "i": 1, "z": "0", "T": 1}
        }"#;

        assert!(matches!(
            parse_message(text),
            Err(ParseError::UnknownValue { .. })
        ));
    }

    #[test]
    fn test_unknown_stream_ignored() {
        let text = r#"{"stream": "btcusdt@kline_1m", "data": {}}"#;
        assert!(parse_message(text).unwrap().is_empty());
    }
}
