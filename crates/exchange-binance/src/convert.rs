//! Conversions between wire responses and domain records.

use crate::responses::{OrderResponse, PositionRiskResponse};
use exchange_core::ExchangeError;
use model::{
    MarginType, OrderRecord, OrderSide, OrderStatus, OrderType, PositionRecord, PositionSide,
};
use rest_client::RestError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Map a REST-layer failure into the adapter error taxonomy.
pub(crate) fn map_rest_error(operation: &str, err: RestError) -> ExchangeError {
    match err {
        RestError::Timeout | RestError::Connection(_) => {
            ExchangeError::transport(operation, err.to_string())
        }
        RestError::RateLimited { .. } => ExchangeError::rate_limited(operation),
        RestError::HttpError { status, message } => {
            // Binance embeds {"code": .., "msg": ..} in the body. A
            // transient HTTP status (5xx, 408) keeps the status as the
            // rejection code even when such a body is present, so the
            // retry policy still recognises it; the venue's application
            // code only wins on non-transient statuses.
            let transient = rest_client::RETRYABLE_STATUS_CODES.contains(&status);
            let (code, msg) = match parse_api_error(&message) {
                Some((_, venue_msg)) if transient => (status as i64, venue_msg),
                Some((venue_code, venue_msg)) => (venue_code, venue_msg),
                None => (status as i64, message),
            };
            ExchangeError::rejected(operation, code, msg)
        }
        RestError::Parse(msg) => ExchangeError::transport(operation, format!("parse: {}", msg)),
        RestError::RequestBuild(msg) => ExchangeError::Config(msg),
    }
}

fn parse_api_error(body: &str) -> Option<(i64, String)> {
    #[derive(serde::Deserialize)]
    struct ApiError {
        code: i64,
        msg: String,
    }

    serde_json::from_str::<ApiError>(body)
        .ok()
        .map(|e| (e.code, e.msg))
}

pub(crate) fn invalid_wire(field: &str, value: &str) -> ExchangeError {
    ExchangeError::InvalidRequest(format!("unknown {} '{}'", field, value))
}

/// Build an [`OrderRecord`] from an order endpoint response.
pub(crate) fn order_record_from_response(
    response: &OrderResponse,
    is_spot: bool,
) -> Result<OrderRecord, ExchangeError> {
    let side = OrderSide::from_wire(&response.side)
        .ok_or_else(|| invalid_wire("order side", &response.side))?;
    let status = OrderStatus::from_wire(&response.status)
        .ok_or_else(|| invalid_wire("order status", &response.status))?;
    let order_type = parse_order_type(&response.order_type)?;

    let position_side = match response.position_side.as_deref() {
        Some(s) => {
            PositionSide::from_wire(s).ok_or_else(|| invalid_wire("position side", s))?
        }
        None => PositionSide::Both,
    };

    let avg_fill_price = response
        .avg_price
        .as_deref()
        .and_then(|s| s.parse::<Decimal>().ok())
        .filter(|p| *p > Decimal::ZERO);

    let stop_price = response
        .stop_price
        .as_deref()
        .and_then(|s| s.parse::<Decimal>().ok())
        .filter(|p| *p > Decimal::ZERO);

    Ok(OrderRecord {
        order_id: response.order_id,
        client_order_id: response.client_order_id.clone(),
        symbol: response.symbol.clone(),
        side,
        order_type,
        status,
        position_side,
        margin_type: MarginType::Isolated,
        is_spot,
        original_qty: response.orig_qty,
        executed_qty: response.executed_qty,
        price: Some(response.price).filter(|p| *p > Decimal::ZERO),
        avg_fill_price,
        stop_price,
        commission: Decimal::ZERO,
        commission_asset: String::new(),
        created_at_ms: if response.time > 0 {
            response.time
        } else {
            response.update_time
        },
        updated_at_ms: response.update_time,
    })
}

/// The futures surface names some types differently from the domain codec.
fn parse_order_type(wire: &str) -> Result<OrderType, ExchangeError> {
    match wire {
        // Venue spellings for post-only and stop types
        "LIMIT_MAKER" | "GTX" => Ok(OrderType::PostOnly),
        "STOP" => Ok(OrderType::StopLimit),
        "TAKE_PROFIT_MARKET" => Ok(OrderType::TakeProfit),
        other => OrderType::from_wire(other).ok_or_else(|| invalid_wire("order type", other)),
    }
}

/// Build a [`PositionRecord`] from a positionRisk entry.
pub(crate) fn position_record_from_response(
    response: &PositionRiskResponse,
) -> Result<PositionRecord, ExchangeError> {
    let margin_type = MarginType::from_wire(&response.margin_type.to_uppercase())
        .ok_or_else(|| invalid_wire("margin type", &response.margin_type))?;

    let leverage = response.leverage.to_u32().unwrap_or(1).max(1);

    Ok(PositionRecord {
        symbol: response.symbol.clone(),
        size: response.position_amt,
        entry_price: response.entry_price,
        mark_price: response.mark_price,
        unrealized_pnl: response.unrealized_profit,
        liquidation_price: response.liquidation_price,
        margin: response.isolated_margin,
        leverage,
        margin_type,
        is_spot: false,
        updated_at_ms: response.update_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order_response() -> OrderResponse {
        serde_json::from_str(
            r#"{
                "symbol": "BTCUSDT",
                "orderId": 7,
                "clientOrderId": "c-7",
                "status": "PARTIALLY_FILLED",
                "side": "SELL",
                "type": "LIMIT",
                "timeInForce": "GTC",
                "origQty": "1.0",
                "executedQty": "0.4",
                "price": "50000",
                "avgPrice": "50010.5",
                "updateTime": 123
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_order_record_conversion() {
        let record = order_record_from_response(&order_response(), false).unwrap();
        assert_eq!(record.order_id, 7);
        assert_eq!(record.status, OrderStatus::PartiallyFilled);
        assert_eq!(record.remaining_qty(), dec!(0.6));
        assert_eq!(record.avg_fill_price, Some(dec!(50010.5)));
        assert!(!record.is_spot);
    }

    #[test]
    fn test_unknown_status_is_invalid_request() {
        let mut response = order_response();
        response.status = "FROZEN".into();
        let err = order_record_from_response(&response, false).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidRequest(_)));
    }

    #[test]
    fn test_venue_type_spellings() {
        assert_eq!(parse_order_type("LIMIT_MAKER").unwrap(), OrderType::PostOnly);
        assert_eq!(parse_order_type("STOP").unwrap(), OrderType::StopLimit);
        assert_eq!(
            parse_order_type("TAKE_PROFIT_MARKET").unwrap(),
            OrderType::TakeProfit
        );
        assert!(parse_order_type("TRAILING_STOP_MARKET").is_err());
    }

    #[test]
    fn test_rest_error_mapping() {
        let err = map_rest_error("place_order", RestError::Timeout);
        assert!(matches!(err, ExchangeError::Transport { .. }));

        let err = map_rest_error(
            "place_order",
            RestError::RateLimited { retry_after_ms: 1 },
        );
        assert!(matches!(err, ExchangeError::RateLimited { .. }));

        let err = map_rest_error(
            "place_order",
            RestError::HttpError {
                status: 400,
                message: r#"{"code":-2010,"msg":"insufficient balance"}"#.into(),
            },
        );
        match err {
            ExchangeError::Rejected { code, message, .. } => {
                assert_eq!(code, -2010);
                assert_eq!(message, "insufficient balance");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_transient_status_stays_retryable_despite_venue_body() {
        // A 503 often carries a structured body; the status must still
        // drive retry classification
        let err = map_rest_error(
            "mark_price",
            RestError::HttpError {
                status: 503,
                message: r#"{"code":-1001,"msg":"Internal error; unable to process your request."}"#.into(),
            },
        );
        match err {
            ExchangeError::Rejected { code, ref message, .. } => {
                assert_eq!(code, 503);
                assert_eq!(message, "Internal error; unable to process your request.");
            }
            ref other => panic!("unexpected: {:?}", other),
        }
        assert!(err.is_retryable());

        // Without a JSON body the status is the code as before
        let err = map_rest_error(
            "mark_price",
            RestError::HttpError {
                status: 502,
                message: "<html>bad gateway</html>".into(),
            },
        );
        assert!(matches!(err, ExchangeError::Rejected { code: 502, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_position_record_conversion() {
        let response: PositionRiskResponse = serde_json::from_str(
            r#"{
                "symbol": "ETHUSDT",
                "positionAmt": "2.5",
                "entryPrice": "3000",
                "markPrice": "3010",
                "unRealizedProfit": "25",
                "liquidationPrice": "2500",
                "isolatedMargin": "750",
                "leverage": "10",
                "marginType": "cross",
                "updateTime": 99
            }"#,
        )
        .unwrap();

        let record = position_record_from_response(&response).unwrap();
        assert_eq!(record.size, dec!(2.5));
        assert_eq!(record.leverage, 10);
        assert_eq!(record.margin_type, MarginType::Cross);
    }
}
