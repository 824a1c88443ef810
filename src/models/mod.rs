use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One (price, volume) observation from the market stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub price: f64,
    pub volume: f64,
    pub received_at: DateTime<Utc>,
}

impl Tick {
    pub fn new(price: f64, volume: f64) -> Self {
        Self::at(price, volume, Utc::now())
    }

    pub fn at(price: f64, volume: f64, received_at: DateTime<Utc>) -> Self {
        Self {
            price,
            volume,
            received_at,
        }
    }
}

/// Order side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Wire name used by the exchange
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "Buy",
            TradeSide::Sell => "Sell",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        })
    }
}

/// Account balances keyed by asset (e.g. "USDT")
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance(pub HashMap<String, f64>);

impl Balance {
    pub fn get(&self, asset: &str) -> Option<f64> {
        self.0.get(asset).copied()
    }

    pub fn with(mut self, asset: &str, amount: f64) -> Self {
        self.0.insert(asset.to_string(), amount);
        self
    }
}

/// Exchange-imposed order sizing constraints for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantityConstraints {
    pub step: f64,
    pub min_quantity: f64,
}

impl QuantityConstraints {
    pub fn new(step: f64, min_quantity: f64) -> Self {
        Self { step, min_quantity }
    }

    /// Number of decimals implied by the quantity step (0.001 -> 3, 1 -> 0)
    pub fn precision(&self) -> u32 {
        if self.step <= 0.0 || !self.step.is_finite() {
            return 0;
        }
        (-self.step.log10()).round().max(0.0) as u32
    }
}

/// Result of a market order as reported by the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderOutcome {
    Filled { order_id: String },
    Rejected { message: String },
}

impl OrderOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderOutcome::Filled { .. })
    }
}
