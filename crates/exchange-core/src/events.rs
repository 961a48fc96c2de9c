//! Typed events delivered by the streaming side of an adapter.
//!
//! Events are deserialized on the stream receiver task and pushed into
//! per-component channels; handlers never call back into the adapter and
//! never take the strategy state lock.

use model::{OrderRecord, PositionRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Mark price tick for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkPriceEvent {
    pub symbol: String,
    pub mark_price: Decimal,
    pub event_time_ms: i64,
}

/// Funding rate update, carrying the next settlement time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRateEvent {
    pub symbol: String,
    pub funding_rate: Decimal,
    pub next_funding_time_ms: i64,
    pub event_time_ms: i64,
}

/// Best bid/ask update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookTickerEvent {
    pub symbol: String,
    pub bid_price: Decimal,
    pub bid_qty: Decimal,
    pub ask_price: Decimal,
    pub ask_qty: Decimal,
    pub event_time_ms: i64,
}

/// One asset balance inside an account update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// All event kinds the streaming surface can deliver.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    MarkPrice(MarkPriceEvent),
    FundingRate(FundingRateEvent),
    BookTicker(BookTickerEvent),
    OrderUpdate(OrderRecord),
    AccountUpdate(Vec<AccountBalance>),
    PositionUpdate(PositionRecord),
}

impl StreamEvent {
    /// Symbol this event concerns, if any.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::MarkPrice(e) => Some(&e.symbol),
            Self::FundingRate(e) => Some(&e.symbol),
            Self::BookTicker(e) => Some(&e.symbol),
            Self::OrderUpdate(r) => Some(&r.symbol),
            Self::PositionUpdate(p) => Some(&p.symbol),
            Self::AccountUpdate(_) => None,
        }
    }
}

pub type StreamSender = mpsc::Sender<StreamEvent>;
pub type StreamReceiver = mpsc::Receiver<StreamEvent>;

/// Create a bounded stream event channel.
pub fn create_stream_channel(capacity: usize) -> (StreamSender, StreamReceiver) {
    mpsc::channel(capacity)
}
