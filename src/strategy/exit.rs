use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::execution::OpenPosition;
use crate::indicators::calculate_ema_series;

/// Configuration for position exits and the adaptive trailing stop
#[derive(Debug, Clone)]
pub struct ExitConfig {
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub base_trailing_stop_pct: f64, // Stop distance when momentum is flat
    pub max_hold: Duration,
    pub slope_ema_period: usize,
    pub slope_lookback: usize, // Closes used for the slope EMA
    pub stagnation_window: usize,
    pub stagnant_return_pct: f64, // |return| below this over the window is stagnant
    pub stagnant_volume_ratio: f64, // Current volume below this share of average
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            take_profit_pct: 2.5,
            stop_loss_pct: 2.0,
            base_trailing_stop_pct: 1.2,
            max_hold: Duration::seconds(120),
            slope_ema_period: 9,
            slope_lookback: 30,
            stagnation_window: 10,
            stagnant_return_pct: 0.3,
            stagnant_volume_ratio: 0.6,
        }
    }
}

/// Why a position was closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExitReason {
    TrailingStop { stop: f64 },
    TakeProfit,
    StopLoss,
    Timeout,
    StagnantTimeout,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TrailingStop { stop } => write!(f, "Trailing stop hit ({:.4})", stop),
            ExitReason::TakeProfit => write!(f, "Take profit"),
            ExitReason::StopLoss => write!(f, "Stop loss"),
            ExitReason::Timeout => write!(f, "Timeout"),
            ExitReason::StagnantTimeout => write!(f, "Timeout: stagnant market"),
        }
    }
}

/// Percentage change of the EMA series against its third most recent value
///
/// Returns 0 when the series has fewer than three values.
pub fn ema_slope_pct(closes: &[f64], period: usize) -> f64 {
    let series = calculate_ema_series(closes, period);
    if series.len() < 3 {
        return 0.0;
    }

    let latest = series[series.len() - 1];
    let earlier = series[series.len() - 3];
    if earlier == 0.0 {
        return 0.0;
    }

    (latest - earlier) / earlier * 100.0
}

/// Trailing stop distance for a given EMA slope
///
/// Steeper momentum tightens the stop; otherwise the base distance applies.
pub fn stop_distance_pct(slope_pct: f64, base_pct: f64) -> f64 {
    if slope_pct > 0.5 {
        0.5
    } else if slope_pct > 0.3 {
        0.8
    } else if slope_pct > 0.1 {
        1.2
    } else {
        base_pct
    }
}

/// Exit rules for an open position
#[derive(Debug, Clone, Default)]
pub struct ExitPolicy {
    config: ExitConfig,
}

impl ExitPolicy {
    pub fn new(config: ExitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    /// Recompute the adaptive stop and raise it if the candidate is higher
    ///
    /// Returns the new stop price when it moved.
    pub fn update_trailing_stop(
        &self,
        position: &mut OpenPosition,
        closes: &[f64],
    ) -> Option<f64> {
        let start = closes.len().saturating_sub(self.config.slope_lookback);
        let slope = ema_slope_pct(&closes[start..], self.config.slope_ema_period);
        let distance = stop_distance_pct(slope, self.config.base_trailing_stop_pct);
        let candidate = position.high_watermark_ema * (1.0 - distance / 100.0);

        tracing::debug!(
            slope = %format!("{:.4}", slope),
            distance = %distance,
            candidate = %format!("{:.4}", candidate),
            "Trailing stop recompute"
        );

        if position.raise_stop(candidate) {
            Some(position.trailing_stop_price)
        } else {
            None
        }
    }

    /// Check whether the position should exit
    ///
    /// Rules are checked in a fixed order and the first match wins:
    /// trailing stop, take profit, stop loss, timeout.
    pub fn check_exit(
        &self,
        position: &OpenPosition,
        price: f64,
        closes: &[f64],
        volumes: &[f64],
        now: DateTime<Utc>,
    ) -> Option<ExitReason> {
        if price <= position.trailing_stop_price {
            return Some(ExitReason::TrailingStop {
                stop: position.trailing_stop_price,
            });
        }

        if price >= position.entry_price * (1.0 + self.config.take_profit_pct / 100.0) {
            return Some(ExitReason::TakeProfit);
        }

        if price <= position.entry_price * (1.0 - self.config.stop_loss_pct / 100.0) {
            return Some(ExitReason::StopLoss);
        }

        if now - position.entry_time > self.config.max_hold {
            if self.is_stagnant(closes, volumes) {
                return Some(ExitReason::StagnantTimeout);
            }
            return Some(ExitReason::Timeout);
        }

        None
    }

    /// Small recent return on fading volume
    fn is_stagnant(&self, closes: &[f64], volumes: &[f64]) -> bool {
        let n = self.config.stagnation_window;
        if n == 0 || closes.len() < n || volumes.len() < n {
            return false;
        }

        let first = closes[closes.len() - n];
        let last = closes[closes.len() - 1];
        if first == 0.0 {
            return false;
        }
        let recent_return = (last - first) / first * 100.0;

        let recent_volumes = &volumes[volumes.len() - n..];
        let avg_volume = recent_volumes.iter().sum::<f64>() / n as f64;
        let current_volume = volumes[volumes.len() - 1];

        recent_return.abs() < self.config.stagnant_return_pct
            && current_volume < avg_volume * self.config.stagnant_volume_ratio
    }
}
