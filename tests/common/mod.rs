#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tickbot::execution::{SessionConfig, SymbolSession};
use tickbot::gateway::{AccountGateway, GatewayError};
use tickbot::journal::{MemoryJournal, TradeRecord, TradeSink};
use tickbot::risk::RiskSupervisor;
use tickbot::strategy::{EntryConfig, EntrySignal, ExitConfig, ExitPolicy};
use tickbot::{Balance, OrderOutcome, QuantityConstraints, Tick, TradeSide};

/// Scripted exchange account
pub struct MockGateway {
    balance: Mutex<Result<Balance, String>>,
    constraints: QuantityConstraints,
    order_replies: Mutex<VecDeque<Result<OrderOutcome, String>>>,
    orders: Mutex<Vec<(String, TradeSide, f64)>>,
    balance_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new(usdt: f64) -> Self {
        Self::with_constraints(usdt, QuantityConstraints::new(0.001, 0.001))
    }

    pub fn with_constraints(usdt: f64, constraints: QuantityConstraints) -> Self {
        Self {
            balance: Mutex::new(Ok(Balance::default().with("USDT", usdt))),
            constraints,
            order_replies: Mutex::new(VecDeque::new()),
            orders: Mutex::new(Vec::new()),
            balance_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_usdt(&self, usdt: f64) {
        *self.balance.lock().unwrap() = Ok(Balance::default().with("USDT", usdt));
    }

    pub fn set_balance(&self, balance: Balance) {
        *self.balance.lock().unwrap() = Ok(balance);
    }

    pub fn fail_balance(&self, message: &str) {
        *self.balance.lock().unwrap() = Err(message.to_string());
    }

    /// Queue the reply for the next order; unqueued orders fill
    pub fn reply_next_order(&self, reply: Result<OrderOutcome, String>) {
        self.order_replies.lock().unwrap().push_back(reply);
    }

    pub fn orders(&self) -> Vec<(String, TradeSide, f64)> {
        self.orders.lock().unwrap().clone()
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountGateway for MockGateway {
    async fn get_balance(&self) -> Result<Balance, GatewayError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.balance
            .lock()
            .unwrap()
            .clone()
            .map_err(|message| GatewayError::Api {
                code: 10002,
                message,
            })
    }

    async fn get_quantity_constraints(
        &self,
        symbol: &str,
    ) -> Result<QuantityConstraints, GatewayError> {
        if symbol == "NOPEUSDT" {
            return Err(GatewayError::UnknownSymbol(symbol.to_string()));
        }
        Ok(self.constraints)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: f64,
    ) -> Result<OrderOutcome, GatewayError> {
        let mut orders = self.orders.lock().unwrap();
        orders.push((symbol.to_string(), side, quantity));
        let order_id = format!("order-{}", orders.len());
        drop(orders);

        match self.order_replies.lock().unwrap().pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(GatewayError::Api {
                code: 170131,
                message,
            }),
            None => Ok(OrderOutcome::Filled { order_id }),
        }
    }
}

/// Sink that always fails
pub struct BrokenJournal;

impl TradeSink for BrokenJournal {
    fn record(&self, _record: &TradeRecord) -> tickbot::Result<()> {
        Err("disk full".into())
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

/// 30 closes that end in a pullback inside an uptrend, last close exactly 100
pub fn entry_series() -> Vec<f64> {
    let mut closes: Vec<f64> = (0..16).map(|i| 100.0 + 2.0 * i as f64).collect();
    closes.extend((1..=14).map(|i| 130.0 - 0.5 * i as f64));
    closes.iter().map(|p| p * 100.0 / 123.0).collect()
}

/// Exit rules with take profit moved out of the way
pub fn wide_take_profit() -> ExitConfig {
    ExitConfig {
        take_profit_pct: 10.0,
        ..ExitConfig::default()
    }
}

pub struct Harness {
    pub session: SymbolSession,
    pub gateway: Arc<MockGateway>,
    pub journal: Arc<MemoryJournal>,
    pub risk: Arc<RiskSupervisor>,
}

impl Harness {
    pub fn new(gateway: MockGateway) -> Self {
        Self::with_exit(gateway, ExitConfig::default())
    }

    pub fn with_exit(gateway: MockGateway, exit: ExitConfig) -> Self {
        let constraints = gateway.constraints;
        let gateway = Arc::new(gateway);
        let journal = Arc::new(MemoryJournal::new());
        let risk = Arc::new(RiskSupervisor::new(-5.0));

        let session = SymbolSession::new(
            "SOLUSDT",
            SessionConfig::default(),
            constraints,
            EntrySignal::new(EntryConfig::default()),
            ExitPolicy::new(exit),
            gateway.clone(),
            risk.clone(),
            journal.clone(),
        );

        Self {
            session,
            gateway,
            journal,
            risk,
        }
    }

    /// Feed the entry series one second apart; the last tick is at 29s
    pub async fn warm_up_and_enter(&mut self) -> tickbot::execution::TickOutcome {
        let series = entry_series();
        let last = series.len() - 1;
        for (i, price) in series.iter().take(last).enumerate() {
            self.session.on_tick(Tick::at(*price, 1.0, at(i as i64))).await;
        }
        self.session
            .on_tick(Tick::at(series[last], 1.0, at(last as i64)))
            .await
    }

    pub fn records(&self) -> Vec<TradeRecord> {
        self.journal.records()
    }
}

/// Local stand-in for the Bybit public stream
pub struct TickerServer {
    pub url: String,
    /// First message of every connection, in connection order
    pub subscriptions: tokio::sync::mpsc::UnboundedReceiver<String>,
}

pub fn ticker_json(price: f64) -> String {
    serde_json::json!({
        "topic": "tickers.SOLUSDT",
        "type": "snapshot",
        "data": {
            "symbol": "SOLUSDT",
            "lastPrice": price.to_string(),
            "volume24h": "1000",
        }
    })
    .to_string()
}

/// Serve `prices` to every connection; with `close_after_send` the server
/// hangs up once they are sent
pub async fn start_ticker_server(prices: Vec<f64>, close_after_send: bool) -> TickerServer {
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (sub_tx, sub_rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let prices = prices.clone();
            let sub_tx = sub_tx.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };

                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    let _ = sub_tx.send(text.as_str().to_string());
                }
                let ack = r#"{"success":true,"ret_msg":"","op":"subscribe"}"#;
                let _ = ws.send(Message::Text(ack.into())).await;

                for price in prices {
                    if ws.send(Message::Text(ticker_json(price).into())).await.is_err() {
                        return;
                    }
                }

                if close_after_send {
                    let _ = ws.close(None).await;
                    return;
                }

                // Keep the connection open until the client leaves
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    TickerServer {
        url: format!("ws://{}", addr),
        subscriptions: sub_rx,
    }
}

/// Poll `check` every 20ms until it holds or 5s pass
pub async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    check()
}
