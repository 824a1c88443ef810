// Risk management module
pub mod supervisor;

pub use supervisor::{RiskCheck, RiskSnapshot, RiskState, RiskSupervisor};
