// Exchange account access
// The session only talks to the exchange through `AccountGateway`
pub mod bybit;

pub use bybit::{BybitConfig, BybitGateway};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Balance, OrderOutcome, QuantityConstraints, TradeSide};

/// Errors from talking to the exchange
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Exchange API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Symbol {0} not listed by the exchange")]
    UnknownSymbol(String),

    #[error("Invalid value in response: {0}")]
    InvalidValue(String),

    #[error("Missing credentials for private endpoint")]
    MissingCredentials,
}

/// Balance queries and market orders for one account
#[async_trait]
pub trait AccountGateway: Send + Sync {
    /// Current balances keyed by asset
    async fn get_balance(&self) -> Result<Balance, GatewayError>;

    /// Order sizing limits for `symbol`
    async fn get_quantity_constraints(
        &self,
        symbol: &str,
    ) -> Result<QuantityConstraints, GatewayError>;

    /// Submit a market order
    ///
    /// `Ok(OrderOutcome::Rejected)` means the exchange answered and refused.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: f64,
    ) -> Result<OrderOutcome, GatewayError>;
}
