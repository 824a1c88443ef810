//! Bybit spot ticker stream.
//!
//! Keeps a websocket subscription to `tickers.<SYMBOL>` alive and forwards
//! every usable update as a [`Tick`]. Any transport failure is followed by a
//! fixed delay and a full reconnect + resubscribe, forever.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
};
use tracing::{debug, info, warn};

use crate::models::Tick;

const BYBIT_MAINNET_WS: &str = "wss://stream.bybit.com/v5/public/spot";
const BYBIT_TESTNET_WS: &str = "wss://stream-testnet.bybit.com/v5/public/spot";

/// Errors that end a single connection attempt.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection timeout")]
    Timeout,

    #[error("Server closed the stream: {0}")]
    Closed(String),

    #[error("Stream ended unexpectedly")]
    StreamEnded,
}

/// Configuration for the ticker stream.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Use the testnet stream.
    pub testnet: bool,
    /// Overrides the mainnet/testnet URL.
    pub url: Option<String>,
    /// Fixed wait before every reconnect.
    pub reconnect_delay: Duration,
    /// Interval of application-level `{"op":"ping"}` heartbeats.
    pub ping_interval: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            testnet: true,
            url: None,
            reconnect_delay: Duration::from_secs(5),
            ping_interval: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl FeedConfig {
    pub fn url(&self) -> &str {
        match &self.url {
            Some(url) => url.as_str(),
            None if self.testnet => BYBIT_TESTNET_WS,
            None => BYBIT_MAINNET_WS,
        }
    }
}

/// Extract `(price, volume)` from a ticker message.
///
/// Returns `None` for anything without a positive `data.lastPrice`
/// (subscription acks, pongs, malformed updates). Volume comes from
/// `turnover`, then `volume24h`, then defaults to zero.
pub fn parse_ticker_message(text: &str) -> Option<(f64, f64)> {
    let message: Value = serde_json::from_str(text).ok()?;
    let data = message.get("data")?;

    let price = number_field(data, "lastPrice")?;
    if !price.is_finite() || price <= 0.0 {
        return None;
    }

    let volume = number_field(data, "turnover")
        .or_else(|| number_field(data, "volume24h"))
        .filter(|v| v.is_finite())
        .unwrap_or(0.0);

    Some((price, volume))
}

/// Bybit sends numbers as strings; accept both.
fn number_field(data: &Value, key: &str) -> Option<f64> {
    match data.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Ticker stream for one symbol.
pub struct BybitTickerFeed {
    symbol: String,
    config: FeedConfig,
}

impl BybitTickerFeed {
    pub fn new(symbol: &str, config: FeedConfig) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            config,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Subscription request for this symbol.
    pub fn subscribe_message(&self) -> String {
        serde_json::json!({
            "op": "subscribe",
            "args": [format!("tickers.{}", self.symbol)],
        })
        .to_string()
    }

    /// Stream ticks into `tx` until the receiving side is dropped.
    ///
    /// Connection failures never end this loop; they are logged and retried
    /// after the configured delay.
    pub async fn run(&self, tx: mpsc::Sender<Tick>) {
        loop {
            match self.run_connection(&tx).await {
                Ok(()) => {
                    info!(symbol = %self.symbol, "Tick receiver closed, feed stopping");
                    return;
                }
                Err(e) => {
                    warn!(
                        symbol = %self.symbol,
                        "Feed error: {e}, reconnecting in {:?}",
                        self.config.reconnect_delay
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                        _ = tx.closed() => {
                            info!(symbol = %self.symbol, "Feed stopped during reconnect delay");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One connection: connect, subscribe, pump messages.
    ///
    /// `Ok(())` means the tick receiver went away.
    async fn run_connection(&self, tx: &mpsc::Sender<Tick>) -> Result<(), FeedError> {
        let url = self.config.url();
        info!(symbol = %self.symbol, "Connecting to {url}");

        let (ws_stream, _response) = timeout(self.config.connect_timeout, connect_async(url))
            .await
            .map_err(|_| FeedError::Timeout)??;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = self.subscribe_message();
        debug!(symbol = %self.symbol, "Subscribing: {subscribe}");
        write.send(Message::Text(subscribe.into())).await?;

        let mut heartbeat = interval(self.config.ping_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = tx.closed() => return Ok(()),

                _ = heartbeat.tick() => {
                    write.send(Message::Text(r#"{"op":"ping"}"#.into())).await?;
                }

                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        match parse_ticker_message(text.as_str()) {
                            Some((price, volume)) => {
                                debug!(symbol = %self.symbol, price = %price, "Ticker update");
                                if tx.send(Tick::new(price, volume)).await.is_err() {
                                    return Ok(());
                                }
                            }
                            None => debug!(symbol = %self.symbol, "Ignoring message: {}", text.as_str()),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        write.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(FeedError::Closed(format!("{:?}", frame)));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(FeedError::StreamEnded),
                },
            }
        }
    }
}
