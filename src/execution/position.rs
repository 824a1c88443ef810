use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smoothing factor for the high-watermark EMA
const WATERMARK_EMA_ALPHA: f64 = 0.2;

/// Tolerance when dividing a quantity by its step, so 0.3 / 0.1 floors to 3
const STEP_EPSILON: f64 = 1e-9;

/// Position state of a symbol session
///
/// Every open-position field lives inside `Open`, so they are set and
/// cleared together.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Position {
    #[default]
    Flat,
    Open(OpenPosition),
}

impl Position {
    pub fn is_open(&self) -> bool {
        matches!(self, Position::Open(_))
    }

    pub fn as_open(&self) -> Option<&OpenPosition> {
        match self {
            Position::Open(open) => Some(open),
            Position::Flat => None,
        }
    }

    pub fn as_open_mut(&mut self) -> Option<&mut OpenPosition> {
        match self {
            Position::Open(open) => Some(open),
            Position::Flat => None,
        }
    }

    /// Move the open position out, leaving the session flat
    pub fn take(&mut self) -> Option<OpenPosition> {
        match std::mem::take(self) {
            Position::Open(open) => Some(open),
            Position::Flat => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_time: DateTime<Utc>,
    pub high_watermark: f64,      // Highest price seen while open
    pub high_watermark_ema: f64,  // Smoothed anchor for the trailing stop
    pub trailing_stop_price: f64, // Never moves down
}

impl OpenPosition {
    /// Open at `entry_price` with the stop `base_stop_pct` below it
    pub fn new(
        entry_price: f64,
        quantity: f64,
        entry_time: DateTime<Utc>,
        base_stop_pct: f64,
    ) -> Self {
        Self {
            entry_price,
            quantity,
            entry_time,
            high_watermark: entry_price,
            high_watermark_ema: entry_price,
            trailing_stop_price: entry_price * (1.0 - base_stop_pct / 100.0),
        }
    }

    /// Fold a new price into the watermark and its EMA
    pub fn observe(&mut self, price: f64) {
        if price > self.high_watermark {
            self.high_watermark = price;
        }
        self.high_watermark_ema =
            WATERMARK_EMA_ALPHA * price + (1.0 - WATERMARK_EMA_ALPHA) * self.high_watermark_ema;
    }

    /// Raise the trailing stop to `candidate` if it is higher
    ///
    /// Returns true if the stop moved.
    pub fn raise_stop(&mut self, candidate: f64) -> bool {
        if candidate > self.trailing_stop_price {
            self.trailing_stop_price = candidate;
            true
        } else {
            false
        }
    }

    /// Unrealized (or realized, at exit) P&L at `price`
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity
    }

    pub fn gain_pct(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price * 100.0
    }
}

/// Round `value` to `decimals` places
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Quantity bought with `capital` at `price`, rounded to the exchange precision
pub fn entry_quantity(capital: f64, price: f64, precision: u32) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    round_to(capital / price, precision)
}

/// Largest multiple of `step` not above `quantity`, rounded to `precision`
pub fn sellable_quantity(quantity: f64, step: f64, precision: u32) -> f64 {
    if step <= 0.0 {
        return round_to(quantity, precision);
    }
    let steps = (quantity / step + STEP_EPSILON).floor();
    round_to(steps * step, precision)
}
