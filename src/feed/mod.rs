// Market data module
pub mod bybit;

pub use bybit::{parse_ticker_message, BybitTickerFeed, FeedConfig, FeedError};
