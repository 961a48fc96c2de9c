//! Exchange adapter contract consumed by the core.
//!
//! Concrete adapters (REST + streaming) implement [`ExchangeApi`] and emit
//! [`StreamEvent`]s; the rest of the system depends only on this crate, so
//! venues can be swapped without touching strategy, execution or risk code.

mod api;
mod error;
mod events;

pub use api::{ExchangeApi, SharedExchangeApi};
pub use error::ExchangeError;
pub use events::{
    create_stream_channel, AccountBalance, BookTickerEvent, FundingRateEvent, MarkPriceEvent,
    StreamEvent, StreamReceiver, StreamSender,
};
