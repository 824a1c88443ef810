// Technical indicators module
// Pure functions over price slices: RSI, SMA, EMA (value and series)

pub mod moving_average;
pub mod rsi;

pub use moving_average::{calculate_ema, calculate_ema_series, calculate_sma};
pub use rsi::calculate_rsi;
