// Process-wide owner of the running symbol sessions
//
// Each session runs in its own task and is fed by its own channel; the only
// state shared between sessions is the risk supervisor.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::execution::{SessionConfig, SessionSnapshot, SymbolSession};
use crate::feed::{BybitTickerFeed, FeedConfig};
use crate::gateway::AccountGateway;
use crate::journal::TradeSink;
use crate::models::{QuantityConstraints, Tick};
use crate::risk::{RiskSnapshot, RiskSupervisor};
use crate::strategy::{EntryConfig, EntrySignal, ExitConfig, ExitPolicy};
use crate::Result;

/// Buffered ticks per session before the feed waits
pub const TICK_CHANNEL_CAPACITY: usize = 256;

/// Everything a supervisor needs to build sessions
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub entry: EntryConfig,
    pub exit: ExitConfig,
    pub feed: FeedConfig,
    pub max_drawdown_pct: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for EngineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            session: settings.session_config(),
            entry: settings.entry_config(),
            exit: settings.exit_config(),
            feed: settings.feed_config(),
            max_drawdown_pct: settings.momentum.max_drawdown_pct,
        }
    }
}

/// A running session and the handles used to control it
struct SessionHandle {
    active: Arc<AtomicBool>,
    status: watch::Receiver<SessionSnapshot>,
    feed_task: Option<JoinHandle<()>>,
    shutdown: oneshot::Sender<()>,
    session_task: JoinHandle<SymbolSession>,
}

pub struct Supervisor {
    config: EngineConfig,
    gateway: Arc<dyn AccountGateway>,
    risk: Arc<RiskSupervisor>,
    journal: Arc<dyn TradeSink>,
    sessions: HashMap<String, SessionHandle>,
}

impl Supervisor {
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn AccountGateway>,
        journal: Arc<dyn TradeSink>,
    ) -> Self {
        let risk = Arc::new(RiskSupervisor::new(config.max_drawdown_pct));
        Self {
            config,
            gateway,
            risk,
            journal,
            sessions: HashMap::new(),
        }
    }

    pub fn risk_supervisor(&self) -> Arc<RiskSupervisor> {
        self.risk.clone()
    }

    /// Symbols with a running session, sorted
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.sessions.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn is_running(&self, symbol: &str) -> bool {
        self.sessions.contains_key(&symbol.to_uppercase())
    }

    /// Start trading `symbol` from the live Bybit ticker stream
    ///
    /// Quantity constraints are fetched once here; a symbol the exchange does
    /// not list is rejected before anything is spawned.
    pub async fn start_symbol(&mut self, symbol: &str) -> Result<()> {
        let symbol = symbol.to_uppercase();
        if self.sessions.contains_key(&symbol) {
            return Err(format!("Session for {} is already running", symbol).into());
        }

        let constraints = self.gateway.get_quantity_constraints(&symbol).await?;
        tracing::info!(
            symbol = %symbol,
            step = %constraints.step,
            min_quantity = %constraints.min_quantity,
            "Quantity constraints loaded"
        );

        let (tx, rx) = mpsc::channel(TICK_CHANNEL_CAPACITY);
        let feed = BybitTickerFeed::new(&symbol, self.config.feed.clone());
        let feed_task = tokio::spawn(async move {
            feed.run(tx).await;
        });

        self.spawn_session(&symbol, constraints, rx, Some(feed_task));
        Ok(())
    }

    /// Start trading `symbol` from an arbitrary tick source
    pub fn start_with_feed(
        &mut self,
        symbol: &str,
        constraints: QuantityConstraints,
        ticks: mpsc::Receiver<Tick>,
    ) -> Result<()> {
        let symbol = symbol.to_uppercase();
        if self.sessions.contains_key(&symbol) {
            return Err(format!("Session for {} is already running", symbol).into());
        }

        self.spawn_session(&symbol, constraints, ticks, None);
        Ok(())
    }

    fn spawn_session(
        &mut self,
        symbol: &str,
        constraints: QuantityConstraints,
        ticks: mpsc::Receiver<Tick>,
        feed_task: Option<JoinHandle<()>>,
    ) {
        let session = SymbolSession::new(
            symbol,
            self.config.session.clone(),
            constraints,
            EntrySignal::new(self.config.entry.clone()),
            ExitPolicy::new(self.config.exit.clone()),
            self.gateway.clone(),
            self.risk.clone(),
            self.journal.clone(),
        );

        let active = session.active_flag();
        let (status_tx, status_rx) = watch::channel(session.snapshot());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let session_task = tokio::spawn(session.run(ticks, status_tx, shutdown_rx));

        self.sessions.insert(
            symbol.to_string(),
            SessionHandle {
                active,
                status: status_rx,
                feed_task,
                shutdown: shutdown_tx,
                session_task,
            },
        );
        tracing::info!(symbol = %symbol, "Session spawned");
    }

    fn set_active(&self, symbol: &str, active: bool) -> bool {
        match self.sessions.get(&symbol.to_uppercase()) {
            Some(handle) => {
                handle.active.store(active, Ordering::SeqCst);
                tracing::info!(
                    symbol = %symbol,
                    "Session {}",
                    if active { "resumed" } else { "paused" }
                );
                true
            }
            None => false,
        }
    }

    /// Stop acting on ticks for `symbol`; ticks keep being consumed
    ///
    /// Returns `false` if no such session runs.
    pub fn pause(&self, symbol: &str) -> bool {
        self.set_active(symbol, false)
    }

    pub fn resume(&self, symbol: &str) -> bool {
        self.set_active(symbol, true)
    }

    pub fn pause_all(&self) {
        for symbol in self.symbols() {
            self.pause(&symbol);
        }
    }

    pub fn resume_all(&self) {
        for symbol in self.symbols() {
            self.resume(&symbol);
        }
    }

    /// Shut down the session for `symbol` and return its final state
    ///
    /// An open position is left as is on the exchange.
    pub async fn stop(&mut self, symbol: &str) -> Option<SessionSnapshot> {
        let handle = self.sessions.remove(&symbol.to_uppercase())?;

        if let Some(feed_task) = handle.feed_task {
            feed_task.abort();
        }
        // The session may already have exited on its own
        let _ = handle.shutdown.send(());

        match handle.session_task.await {
            Ok(session) => {
                let snapshot = session.snapshot();
                if snapshot.position.is_open() {
                    tracing::warn!(
                        symbol = %snapshot.symbol,
                        "Session stopped with an open position"
                    );
                }
                Some(snapshot)
            }
            Err(e) => {
                tracing::error!(symbol = %symbol, "Session task failed: {}", e);
                None
            }
        }
    }

    pub async fn stop_all(&mut self) -> Vec<SessionSnapshot> {
        let mut stopped = Vec::new();
        for symbol in self.symbols() {
            if let Some(snapshot) = self.stop(&symbol).await {
                stopped.push(snapshot);
            }
        }
        stopped
    }

    /// Latest state of every session, sorted by symbol
    pub fn status(&self) -> Vec<SessionSnapshot> {
        self.symbols()
            .iter()
            .filter_map(|symbol| self.sessions.get(symbol))
            .map(|handle| {
                let mut snapshot = handle.status.borrow().clone();
                snapshot.active = handle.active.load(Ordering::SeqCst);
                snapshot
            })
            .collect()
    }

    pub fn risk(&self) -> RiskSnapshot {
        self.risk.snapshot()
    }
}
