//! Supervisor tests: session lifecycle across symbols

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tickbot::engine::{EngineConfig, Supervisor};
use tickbot::feed::FeedConfig;
use tickbot::journal::{MemoryJournal, TradeStatus};
use tickbot::{QuantityConstraints, Tick, TradeSide};
use tokio::sync::mpsc;

fn supervisor(gateway: Arc<MockGateway>, journal: Arc<MemoryJournal>) -> Supervisor {
    Supervisor::new(EngineConfig::default(), gateway, journal)
}

fn constraints() -> QuantityConstraints {
    QuantityConstraints::new(0.001, 0.001)
}

#[tokio::test]
async fn test_start_status_and_stop() {
    let gateway = Arc::new(MockGateway::new(1000.0));
    let mut engine = supervisor(gateway.clone(), Arc::new(MemoryJournal::new()));

    let (sol_tx, sol_rx) = mpsc::channel(64);
    let (btc_tx, btc_rx) = mpsc::channel(64);
    engine.start_with_feed("solusdt", constraints(), sol_rx).unwrap();
    engine.start_with_feed("BTCUSDT", constraints(), btc_rx).unwrap();

    assert_eq!(engine.symbols(), vec!["BTCUSDT", "SOLUSDT"]);
    assert!(engine.is_running("SOLUSDT"));

    sol_tx.send(Tick::new(150.0, 1.0)).await.unwrap();
    sol_tx.send(Tick::new(151.0, 1.0)).await.unwrap();
    btc_tx.send(Tick::new(60000.0, 1.0)).await.unwrap();

    assert!(
        wait_for(|| {
            let status = engine.status();
            status[0].window_len == 1 && status[1].window_len == 2
        })
        .await
    );

    let status = engine.status();
    assert_eq!(status[0].symbol, "BTCUSDT");
    assert_eq!(status[1].symbol, "SOLUSDT");
    assert_eq!(status[1].last_price, Some(151.0));
    assert!(status.iter().all(|s| s.active && !s.position.is_open()));

    // First balance read seeded the shared baseline
    assert_eq!(engine.risk().daily_start_balance, Some(1000.0));

    let snapshot = engine.stop("SOLUSDT").await.unwrap();
    assert_eq!(snapshot.window_len, 2);
    assert!(!engine.is_running("SOLUSDT"));
    assert!(sol_tx.send(Tick::new(152.0, 1.0)).await.is_err());

    let stopped = engine.stop_all().await;
    assert_eq!(stopped.len(), 1);
    assert!(engine.symbols().is_empty());
    assert!(engine.stop("BTCUSDT").await.is_none());
}

#[tokio::test]
async fn test_duplicate_symbol_rejected() {
    let mut engine = supervisor(
        Arc::new(MockGateway::new(1000.0)),
        Arc::new(MemoryJournal::new()),
    );

    let (_tx1, rx1) = mpsc::channel(8);
    let (_tx2, rx2) = mpsc::channel(8);
    engine.start_with_feed("SOLUSDT", constraints(), rx1).unwrap();
    assert!(engine.start_with_feed("solusdt", constraints(), rx2).is_err());
    assert!(engine.start_symbol("SOLUSDT").await.is_err());

    engine.stop_all().await;
}

#[tokio::test]
async fn test_pause_and_resume() {
    let gateway = Arc::new(MockGateway::new(1000.0));
    let mut engine = supervisor(gateway.clone(), Arc::new(MemoryJournal::new()));

    let (tx, rx) = mpsc::channel(64);
    engine.start_with_feed("SOLUSDT", constraints(), rx).unwrap();

    assert!(engine.pause("SOLUSDT"));
    assert!(!engine.pause("ETHUSDT"));
    assert!(!engine.status()[0].active);

    tx.send(Tick::new(150.0, 1.0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    // Paused ticks are consumed without touching the window or the gateway
    assert_eq!(engine.status()[0].window_len, 0);
    assert_eq!(gateway.balance_calls(), 0);

    engine.resume_all();
    tx.send(Tick::new(151.0, 1.0)).await.unwrap();
    assert!(wait_for(|| engine.status()[0].window_len == 1).await);
    assert!(engine.status()[0].active);

    engine.pause_all();
    assert!(!engine.status()[0].active);

    engine.stop_all().await;
}

#[tokio::test]
async fn test_unknown_symbol_not_started() {
    let mut engine = supervisor(
        Arc::new(MockGateway::new(1000.0)),
        Arc::new(MemoryJournal::new()),
    );

    assert!(engine.start_symbol("NOPEUSDT").await.is_err());
    assert!(engine.symbols().is_empty());
}

#[tokio::test]
async fn test_live_feed_to_entry() {
    let server = start_ticker_server(entry_series(), false).await;
    let gateway = Arc::new(MockGateway::new(1000.0));
    let journal = Arc::new(MemoryJournal::new());

    let config = EngineConfig {
        feed: FeedConfig {
            url: Some(server.url.clone()),
            reconnect_delay: Duration::from_millis(50),
            ..FeedConfig::default()
        },
        ..EngineConfig::default()
    };
    let mut engine = Supervisor::new(config, gateway.clone(), journal.clone());

    engine.start_symbol("SOLUSDT").await.unwrap();

    assert!(wait_for(|| engine.status()[0].position.is_open()).await);

    let orders = gateway.orders();
    assert_eq!(orders, vec![("SOLUSDT".to_string(), TradeSide::Buy, 0.5)]);

    let records = journal.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TradeStatus::Filled);
    assert_eq!(records[0].entry_price, 100.0);

    // Stopping leaves the position open
    let snapshot = engine.stop("SOLUSDT").await.unwrap();
    assert!(snapshot.position.is_open());
    assert_eq!(gateway.orders().len(), 1);
}
