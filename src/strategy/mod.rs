// Trading signal module
// Entry predicate (RSI + EMA crossover) and exit rules (adaptive trailing stop)
pub mod entry;
pub mod exit;

pub use entry::{EntryConfig, EntryDecision, EntrySignal};
pub use exit::{ema_slope_pct, stop_distance_pct, ExitConfig, ExitPolicy, ExitReason};
