// Core modules
pub mod config;
pub mod engine;
pub mod execution;
pub mod feed;
pub mod gateway;
pub mod indicators;
pub mod journal;
pub mod models;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use engine::{EngineConfig, Supervisor};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
