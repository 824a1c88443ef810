// Per-symbol trading sessions
pub mod position;
pub mod session;
pub mod window;

pub use position::{entry_quantity, round_to, sellable_quantity, OpenPosition, Position};
pub use session::{SessionConfig, SessionSnapshot, SymbolSession, TickOutcome};
pub use window::{PriceWindow, DEFAULT_WINDOW_CAPACITY};
