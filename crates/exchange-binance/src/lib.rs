//! Binance adapter: signed REST client over the spot and USD-M futures
//! surfaces, plus the market data WebSocket stream.
//!
//! The REST side applies two local rate limiters (general requests, and a
//! stricter one for order placement) and retries transient failures with
//! exponential backoff. The stream side maintains subscriptions across
//! reconnects, re-issuing each exactly once.

mod convert;
mod parser;
mod responses;
mod rest;
mod stream;

pub use rest::{BinanceApi, BinanceApiConfig};
pub use stream::{
    book_ticker_channel, funding_rate_channel, mark_price_channel, MarketStream,
    MarketStreamConfig,
};
