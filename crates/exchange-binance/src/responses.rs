//! Binance REST response types.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

/// Deserialize a Decimal from a JSON string field.
pub(crate) fn decimal_from_str<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let s: std::borrow::Cow<'de, str> = Deserialize::deserialize(deserializer)?;
    s.parse::<Decimal>().map_err(serde::de::Error::custom)
}

/// Response from GET /fapi/v1/time.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerTimeResponse {
    #[serde(rename = "serverTime")]
    pub server_time: i64,
}

/// One symbol entry from GET /fapi/v1/exchangeInfo.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoSymbol {
    pub symbol: String,
    pub status: String,
    #[serde(rename = "contractType", default)]
    pub contract_type: String,
}

/// Response from GET /fapi/v1/exchangeInfo.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<ExchangeInfoSymbol>,
}

/// Response from GET /fapi/v1/premiumIndex.
#[derive(Debug, Clone, Deserialize)]
pub struct PremiumIndexResponse {
    pub symbol: String,
    #[serde(rename = "markPrice", deserialize_with = "decimal_from_str")]
    pub mark_price: Decimal,
    #[serde(rename = "lastFundingRate", deserialize_with = "decimal_from_str")]
    pub last_funding_rate: Decimal,
    #[serde(rename = "nextFundingTime")]
    pub next_funding_time: i64,
}

/// Response from GET .../ticker/price (both surfaces).
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPriceResponse {
    pub symbol: String,
    #[serde(deserialize_with = "decimal_from_str")]
    pub price: Decimal,
}

/// Response from GET /fapi/v1/ticker/24hr.
#[derive(Debug, Clone, Deserialize)]
pub struct Ticker24hResponse {
    pub symbol: String,
    #[serde(deserialize_with = "decimal_from_str")]
    pub volume: Decimal,
}

/// Response from GET /fapi/v1/ticker/bookTicker.
#[derive(Debug, Clone, Deserialize)]
pub struct BookTickerResponse {
    pub symbol: String,
    #[serde(rename = "bidPrice", deserialize_with = "decimal_from_str")]
    pub bid_price: Decimal,
    #[serde(rename = "bidQty", deserialize_with = "decimal_from_str")]
    pub bid_qty: Decimal,
    #[serde(rename = "askPrice", deserialize_with = "decimal_from_str")]
    pub ask_price: Decimal,
    #[serde(rename = "askQty", deserialize_with = "decimal_from_str")]
    pub ask_qty: Decimal,
}

/// Response from GET .../depth (both surfaces). Levels come as
/// `[price, qty]` string pairs, from best inward.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthResponse {
    pub bids: Vec<[Decimal; 2]>,
    pub asks: Vec<[Decimal; 2]>,
}

/// One entry from GET /fapi/v1/trades.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeResponse {
    #[serde(deserialize_with = "decimal_from_str")]
    pub price: Decimal,
    #[serde(deserialize_with = "decimal_from_str")]
    pub qty: Decimal,
    pub time: i64,
}

/// One entry from GET /fapi/v2/balance.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    pub asset: String,
    #[serde(rename = "availableBalance", deserialize_with = "decimal_from_str")]
    pub available_balance: Decimal,
}

/// Response from order placement/query/cancel on either surface.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub symbol: String,
    #[serde(rename = "orderId")]
    pub order_id: u64,
    #[serde(rename = "clientOrderId", default)]
    pub client_order_id: String,
    pub status: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(rename = "timeInForce", default)]
    pub time_in_force: Option<String>,
    #[serde(rename = "positionSide", default)]
    pub position_side: Option<String>,
    #[serde(rename = "origQty", deserialize_with = "decimal_from_str")]
    pub orig_qty: Decimal,
    #[serde(rename = "executedQty", deserialize_with = "decimal_from_str")]
    pub executed_qty: Decimal,
    #[serde(deserialize_with = "decimal_from_str")]
    pub price: Decimal,
    #[serde(rename = "avgPrice", default)]
    pub avg_price: Option<String>,
    #[serde(rename = "stopPrice", default)]
    pub stop_price: Option<String>,
    #[serde(rename = "reduceOnly", default)]
    pub reduce_only: bool,
    #[serde(rename = "updateTime", default)]
    pub update_time: i64,
    #[serde(rename = "time", default)]
    pub time: i64,
}

/// One entry from GET /fapi/v2/positionRisk.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionRiskResponse {
    pub symbol: String,
    #[serde(rename = "positionAmt", deserialize_with = "decimal_from_str")]
    pub position_amt: Decimal,
    #[serde(rename = "entryPrice", deserialize_with = "decimal_from_str")]
    pub entry_price: Decimal,
    #[serde(rename = "markPrice", deserialize_with = "decimal_from_str")]
    pub mark_price: Decimal,
    #[serde(rename = "unRealizedProfit", deserialize_with = "decimal_from_str")]
    pub unrealized_profit: Decimal,
    #[serde(rename = "liquidationPrice", deserialize_with = "decimal_from_str")]
    pub liquidation_price: Decimal,
    #[serde(rename = "isolatedMargin", deserialize_with = "decimal_from_str")]
    pub isolated_margin: Decimal,
    #[serde(deserialize_with = "decimal_from_str")]
    pub leverage: Decimal,
    #[serde(rename = "marginType")]
    pub margin_type: String,
    #[serde(rename = "updateTime", default)]
    pub update_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_deserialize_premium_index() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "markPrice": "50050.00000000",
            "indexPrice": "50040.00000000",
            "lastFundingRate": "0.00100000",
            "nextFundingTime": 1700000000000,
            "time": 1699999000000
        }"#;

        let response: PremiumIndexResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.mark_price, dec!(50050));
        assert_eq!(response.last_funding_rate, dec!(0.001));
        assert_eq!(response.next_funding_time, 1700000000000);
    }

    #[test]
    fn test_deserialize_depth() {
        let json = r#"{
            "lastUpdateId": 1027024,
            "bids": [["50000.00", "1.5"], ["49999.00", "2.0"]],
            "asks": [["50001.00", "1.0"]]
        }"#;

        let response: DepthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.bids.len(), 2);
        assert_eq!(response.bids[0][0], dec!(50000));
        assert_eq!(response.asks[0][1], dec!(1.0));
    }

    #[test]
    fn test_deserialize_order_response() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "orderId": 283194212,
            "clientOrderId": "fa-1700000000-1",
            "status": "NEW",
            "side": "BUY",
            "type": "LIMIT",
            "timeInForce": "GTC",
            "positionSide": "BOTH",
            "origQty": "0.010",
            "executedQty": "0.000",
            "price": "50050.00",
            "avgPrice": "0.00",
            "stopPrice": "0.00",
            "reduceOnly": false,
            "updateTime": 1700000001000
        }"#;

        let response: OrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.order_id, 283194212);
        assert_eq!(response.status, "NEW");
        assert_eq!(response.orig_qty, dec!(0.010));
    }

    #[test]
    fn test_deserialize_position_risk() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "positionAmt": "-0.010",
            "entryPrice": "50050.0",
            "markPrice": "50060.0",
            "unRealizedProfit": "-0.10",
            "liquidationPrice": "55000.0",
            "isolatedMargin": "50.00",
            "leverage": "10",
            "marginType": "isolated",
            "updateTime": 1700000002000
        }"#;

        let response: PositionRiskResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.position_amt, dec!(-0.010));
        assert_eq!(response.leverage, dec!(10));
    }
}
