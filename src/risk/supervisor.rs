use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// Account-level drawdown circuit breaker
///
/// Shared by every symbol session. The first usable balance seeds the
/// baseline for the run; once the drawdown threshold is breached trading
/// stays halted until the process restarts.
#[derive(Debug)]
pub struct RiskSupervisor {
    max_drawdown_pct: f64, // Negative, e.g. -5.0
    state: Mutex<RiskState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_start_balance: Option<f64>,
    pub daily_pnl_pct: f64,
    pub last_balance: Option<f64>,
    pub trading_halted: bool,
}

/// Point-in-time copy of the risk state
pub type RiskSnapshot = RiskState;

/// Result of feeding a balance read to the supervisor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskCheck {
    /// Balance unusable; nothing was updated
    Skipped,
    Ok { pnl_pct: f64 },
    Halted { pnl_pct: f64 },
}

impl RiskSupervisor {
    pub fn new(max_drawdown_pct: f64) -> Self {
        Self {
            max_drawdown_pct,
            state: Mutex::new(RiskState::default()),
        }
    }

    pub fn max_drawdown_pct(&self) -> f64 {
        self.max_drawdown_pct
    }

    fn lock(&self) -> MutexGuard<'_, RiskState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a balance read and decide whether trading may continue
    pub fn observe_balance(&self, balance: f64) -> RiskCheck {
        if !balance.is_finite() || balance <= 0.0 {
            return RiskCheck::Skipped;
        }

        let mut state = self.lock();

        let start = match state.daily_start_balance {
            Some(start) => start,
            None => {
                tracing::info!(balance = %balance, "Daily start balance initialized");
                state.daily_start_balance = Some(balance);
                balance
            }
        };

        let pnl_pct = (balance - start) / start * 100.0;
        state.daily_pnl_pct = pnl_pct;
        state.last_balance = Some(balance);

        if state.trading_halted {
            return RiskCheck::Halted { pnl_pct };
        }

        if pnl_pct <= self.max_drawdown_pct {
            state.trading_halted = true;
            tracing::error!(
                pnl_pct = %format!("{:.2}", pnl_pct),
                threshold = %self.max_drawdown_pct,
                "Drawdown limit breached, trading halted for all symbols"
            );
            return RiskCheck::Halted { pnl_pct };
        }

        RiskCheck::Ok { pnl_pct }
    }

    pub fn is_halted(&self) -> bool {
        self.lock().trading_halted
    }

    pub fn snapshot(&self) -> RiskSnapshot {
        self.lock().clone()
    }
}

impl Default for RiskSupervisor {
    fn default() -> Self {
        Self::new(-5.0)
    }
}
