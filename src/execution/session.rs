use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use super::position::{entry_quantity, sellable_quantity, OpenPosition, Position};
use super::window::{PriceWindow, DEFAULT_WINDOW_CAPACITY};
use crate::gateway::AccountGateway;
use crate::journal::{TradeRecord, TradeSink, TradeStatus};
use crate::models::{OrderOutcome, QuantityConstraints, Tick, TradeSide};
use crate::risk::{RiskCheck, RiskSupervisor};
use crate::strategy::{EntryDecision, EntrySignal, ExitPolicy, ExitReason};

/// Per-session trading parameters
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub capital_per_trade: f64,
    pub quote_asset: String,
    pub window_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capital_per_trade: 50.0,
            quote_asset: "USDT".to_string(),
            window_capacity: DEFAULT_WINDOW_CAPACITY,
        }
    }
}

/// What a single tick did to the session
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Session paused; tick ignored
    Suspended,
    /// Account-level drawdown halt; tick ignored
    Halted,
    /// Balance unreadable or zero; tick ignored
    BalanceSkipped,
    /// Flat, entry conditions not met
    Waiting(EntryDecision),
    Entered { quantity: f64 },
    EntryRejected { reason: String },
    /// Open, no exit condition
    Holding { trailing_stop: f64 },
    Exited { reason: ExitReason, status: TradeStatus },
}

/// Observable state of a session, published after every tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub symbol: String,
    pub active: bool,
    pub position: Position,
    pub last_price: Option<f64>,
    pub window_len: usize,
    pub last_trade_at: Option<DateTime<Utc>>,
}

/// Trading state machine for one symbol
///
/// Ticks must be fed one at a time in arrival order; `on_tick` takes
/// `&mut self`, so a session can never evaluate two ticks concurrently.
pub struct SymbolSession {
    symbol: String,
    config: SessionConfig,
    constraints: QuantityConstraints,
    precision: u32,
    window: PriceWindow,
    position: Position,
    last_trade_at: Option<DateTime<Utc>>,
    active: Arc<AtomicBool>,
    entry_signal: EntrySignal,
    exit_policy: ExitPolicy,
    gateway: Arc<dyn AccountGateway>,
    risk: Arc<RiskSupervisor>,
    journal: Arc<dyn TradeSink>,
}

impl SymbolSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        config: SessionConfig,
        constraints: QuantityConstraints,
        entry_signal: EntrySignal,
        exit_policy: ExitPolicy,
        gateway: Arc<dyn AccountGateway>,
        risk: Arc<RiskSupervisor>,
        journal: Arc<dyn TradeSink>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            window: PriceWindow::new(config.window_capacity),
            config,
            precision: constraints.precision(),
            constraints,
            position: Position::Flat,
            last_trade_at: None,
            active: Arc::new(AtomicBool::new(true)),
            entry_signal,
            exit_policy,
            gateway,
            risk,
            journal,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn window(&self) -> &PriceWindow {
        &self.window
    }

    pub fn last_trade_at(&self) -> Option<DateTime<Utc>> {
        self.last_trade_at
    }

    /// Shared pause flag, checked at the top of every tick
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            symbol: self.symbol.clone(),
            active: self.is_active(),
            position: self.position.clone(),
            last_price: self.window.last_price(),
            window_len: self.window.len(),
            last_trade_at: self.last_trade_at,
        }
    }

    /// Process one tick
    pub async fn on_tick(&mut self, tick: Tick) -> TickOutcome {
        if !self.is_active() {
            return TickOutcome::Suspended;
        }

        if self.risk.is_halted() {
            return TickOutcome::Halted;
        }

        let balance = match self.gateway.get_balance().await {
            Ok(balance) => balance.get(&self.config.quote_asset).unwrap_or(0.0),
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, "Balance query failed: {}", e);
                return TickOutcome::BalanceSkipped;
            }
        };

        match self.risk.observe_balance(balance) {
            RiskCheck::Skipped => {
                tracing::warn!(
                    symbol = %self.symbol,
                    balance = %balance,
                    "Unusable balance, skipping tick"
                );
                return TickOutcome::BalanceSkipped;
            }
            RiskCheck::Halted { .. } => return TickOutcome::Halted,
            RiskCheck::Ok { pnl_pct } => {
                tracing::debug!(
                    symbol = %self.symbol,
                    price = %tick.price,
                    volume = %tick.volume,
                    pnl_pct = %format!("{:.2}", pnl_pct),
                    in_position = self.position.is_open(),
                    "Tick"
                );
            }
        }

        self.window.push(tick.price, tick.volume);

        if self.position.is_open() {
            self.manage_position(tick).await
        } else {
            let decision = self.entry_signal.evaluate(
                &self.window.closes(),
                self.last_trade_at,
                tick.received_at,
            );
            if decision.should_enter() {
                tracing::info!(symbol = %self.symbol, "Entry signal: {:?}", decision);
                self.enter_position(tick.price, tick.received_at).await
            } else {
                tracing::debug!(symbol = %self.symbol, "No entry: {:?}", decision);
                TickOutcome::Waiting(decision)
            }
        }
    }

    /// Buy `capital_per_trade` worth at `price`
    async fn enter_position(&mut self, price: f64, now: DateTime<Utc>) -> TickOutcome {
        let quantity = entry_quantity(self.config.capital_per_trade, price, self.precision);

        if quantity < self.constraints.min_quantity {
            let reason = format!(
                "Below min qty: {} < {}",
                quantity, self.constraints.min_quantity
            );
            tracing::warn!(symbol = %self.symbol, "Entry skipped: {}", reason);
            self.record(TradeRecord::entry(
                &self.symbol,
                TradeStatus::Rejected,
                quantity,
                price,
                reason.clone(),
                now,
            ));
            return TickOutcome::EntryRejected { reason };
        }

        tracing::info!(symbol = %self.symbol, "BUY @ {} x {}", price, quantity);

        let outcome = self
            .gateway
            .place_market_order(&self.symbol, TradeSide::Buy, quantity)
            .await;

        match outcome {
            Ok(OrderOutcome::Filled { order_id }) => {
                self.position = Position::Open(OpenPosition::new(
                    price,
                    quantity,
                    now,
                    self.exit_policy.config().base_trailing_stop_pct,
                ));
                self.last_trade_at = Some(now);

                tracing::info!(
                    symbol = %self.symbol,
                    order_id = %order_id,
                    "Position opened @ {} x {}",
                    price,
                    quantity
                );
                self.record(TradeRecord::entry(
                    &self.symbol,
                    TradeStatus::Filled,
                    quantity,
                    price,
                    format!("Entry order {}", order_id),
                    now,
                ));
                TickOutcome::Entered { quantity }
            }
            Ok(OrderOutcome::Rejected { message }) => {
                self.reject_entry(quantity, price, message, now)
            }
            Err(e) => self.reject_entry(quantity, price, e.to_string(), now),
        }
    }

    fn reject_entry(
        &self,
        quantity: f64,
        price: f64,
        message: String,
        now: DateTime<Utc>,
    ) -> TickOutcome {
        tracing::warn!(symbol = %self.symbol, "Buy failed: {}", message);
        self.record(TradeRecord::entry(
            &self.symbol,
            TradeStatus::Rejected,
            quantity,
            price,
            message.clone(),
            now,
        ));
        TickOutcome::EntryRejected { reason: message }
    }

    /// Update the trailing stop and exit if any rule fires
    async fn manage_position(&mut self, tick: Tick) -> TickOutcome {
        let closes = self.window.closes();
        let volumes = self.window.volumes();

        let Some(position) = self.position.as_open_mut() else {
            return TickOutcome::Waiting(EntryDecision::IndicatorUnavailable);
        };

        position.observe(tick.price);
        let previous_stop = position.trailing_stop_price;
        if let Some(stop) = self.exit_policy.update_trailing_stop(position, &closes) {
            tracing::info!(
                symbol = %self.symbol,
                "Trailing stop raised to {:.4} (was {:.4})",
                stop,
                previous_stop
            );
        }

        match self
            .exit_policy
            .check_exit(position, tick.price, &closes, &volumes, tick.received_at)
        {
            Some(reason) => {
                tracing::info!(symbol = %self.symbol, "Exit: {}", reason);
                self.exit_position(tick.price, reason, tick.received_at).await
            }
            None => TickOutcome::Holding {
                trailing_stop: position.trailing_stop_price,
            },
        }
    }

    /// Sell the whole position
    ///
    /// The position is cleared before anything else happens, so the session
    /// is flat afterwards whatever the exchange answers.
    async fn exit_position(
        &mut self,
        price: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> TickOutcome {
        let Some(open) = self.position.take() else {
            return TickOutcome::Waiting(EntryDecision::IndicatorUnavailable);
        };

        let quantity = sellable_quantity(open.quantity, self.constraints.step, self.precision);

        if quantity < self.constraints.min_quantity {
            tracing::warn!(
                symbol = %self.symbol,
                "Sell skipped, quantity below minimum: {} < {}",
                quantity,
                self.constraints.min_quantity
            );
            self.record(TradeRecord::exit(
                &self.symbol,
                TradeStatus::Skipped,
                quantity,
                open.entry_price,
                price,
                "Below min qty",
                now,
            ));
            return TickOutcome::Exited {
                reason,
                status: TradeStatus::Skipped,
            };
        }

        tracing::info!(symbol = %self.symbol, "SELL @ {} x {}", price, quantity);

        let outcome = self
            .gateway
            .place_market_order(&self.symbol, TradeSide::Sell, quantity)
            .await;

        let (status, recorded_reason) = match outcome {
            Ok(OrderOutcome::Filled { .. }) => (TradeStatus::Filled, reason.to_string()),
            Ok(OrderOutcome::Rejected { message }) => {
                (TradeStatus::Rejected, format!("Sell failed: {}", message))
            }
            Err(e) => (TradeStatus::Rejected, format!("Sell failed: {}", e)),
        };

        let record = TradeRecord::exit(
            &self.symbol,
            status,
            quantity,
            open.entry_price,
            price,
            recorded_reason,
            now,
        );
        tracing::info!(
            symbol = %self.symbol,
            status = ?status,
            pnl = %format!("{:.4}", record.pnl.unwrap_or(0.0)),
            "Position closed @ {}",
            price
        );
        self.record(record);

        TickOutcome::Exited { reason, status }
    }

    /// Journal a record; failures never touch session state
    fn record(&self, record: TradeRecord) {
        if let Err(e) = self.journal.record(&record) {
            tracing::warn!(symbol = %self.symbol, "Failed to journal trade: {}", e);
        }
    }

    /// Consume ticks in order until the channel closes or `shutdown` fires
    ///
    /// On shutdown the channel is closed and ticks still buffered in it are
    /// dropped.
    pub async fn run(
        mut self,
        mut ticks: mpsc::Receiver<Tick>,
        status: watch::Sender<SessionSnapshot>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Self {
        tracing::info!(symbol = %self.symbol, "Session started");

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    ticks.close();
                    break;
                }

                tick = ticks.recv() => match tick {
                    Some(tick) => {
                        let outcome = self.on_tick(tick).await;
                        tracing::trace!(symbol = %self.symbol, "Tick outcome: {:?}", outcome);
                        status.send_replace(self.snapshot());
                    }
                    None => break,
                },
            }
        }

        status.send_replace(self.snapshot());
        tracing::info!(symbol = %self.symbol, "Session stopped");
        self
    }
}
