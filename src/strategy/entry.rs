use chrono::{DateTime, Duration, Utc};

use crate::indicators::{calculate_ema, calculate_rsi};

/// Configuration for the momentum entry signal
#[derive(Debug, Clone)]
pub struct EntryConfig {
    pub rsi_period: usize,
    pub rsi_entry_threshold: f64, // Enter only while RSI is below this
    pub fast_ema_period: usize,
    pub slow_ema_period: usize,
    pub lookback: usize,    // Closes fed to the indicators
    pub min_samples: usize, // Window size before any decision
    pub cooldown: Duration, // Minimum time between trades
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_entry_threshold: 35.0,
            fast_ema_period: 12,
            slow_ema_period: 26,
            lookback: 30,
            min_samples: 30,
            cooldown: Duration::seconds(300),
        }
    }
}

/// Outcome of an entry evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum EntryDecision {
    InsufficientData { samples: usize },
    Cooldown { remaining: Duration },
    IndicatorUnavailable,
    Rejected { rsi: f64, fast_ema: f64, slow_ema: f64 },
    Enter { rsi: f64, fast_ema: f64, slow_ema: f64 },
}

impl EntryDecision {
    pub fn should_enter(&self) -> bool {
        matches!(self, EntryDecision::Enter { .. })
    }
}

/// RSI + EMA crossover entry signal
///
/// Enters when RSI over the lookback is below the threshold while the fast
/// EMA sits above the slow one. Any missing indicator rejects the entry.
#[derive(Debug, Clone, Default)]
pub struct EntrySignal {
    config: EntryConfig,
}

impl EntrySignal {
    pub fn new(config: EntryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EntryConfig {
        &self.config
    }

    /// Evaluate the entry predicate
    ///
    /// Depends only on `closes`, `last_trade_at` and `now`.
    pub fn evaluate(
        &self,
        closes: &[f64],
        last_trade_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> EntryDecision {
        if closes.len() < self.config.min_samples {
            return EntryDecision::InsufficientData {
                samples: closes.len(),
            };
        }

        if let Some(last) = last_trade_at {
            let elapsed = now - last;
            if elapsed < self.config.cooldown {
                return EntryDecision::Cooldown {
                    remaining: self.config.cooldown - elapsed,
                };
            }
        }

        let start = closes.len().saturating_sub(self.config.lookback);
        let recent = &closes[start..];

        let indicators = (
            calculate_rsi(recent, self.config.rsi_period),
            calculate_ema(recent, self.config.fast_ema_period),
            calculate_ema(recent, self.config.slow_ema_period),
        );
        let (rsi, fast_ema, slow_ema) = match indicators {
            (Some(rsi), Some(fast), Some(slow))
                if rsi.is_finite() && fast.is_finite() && slow.is_finite() =>
            {
                (rsi, fast, slow)
            }
            _ => return EntryDecision::IndicatorUnavailable,
        };

        if rsi < self.config.rsi_entry_threshold && fast_ema > slow_ema {
            EntryDecision::Enter {
                rsi,
                fast_ema,
                slow_ema,
            }
        } else {
            EntryDecision::Rejected {
                rsi,
                fast_ema,
                slow_ema,
            }
        }
    }
}
