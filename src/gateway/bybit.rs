use async_trait::async_trait;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::{AccountGateway, GatewayError};
use crate::models::{Balance, OrderOutcome, QuantityConstraints, TradeSide};

// Bybit v5 REST API
// Docs: https://bybit-exchange.github.io/docs/v5/intro
const BYBIT_MAINNET_REST: &str = "https://api.bybit.com";
const BYBIT_TESTNET_REST: &str = "https://api-testnet.bybit.com";

// Type alias for the rate limiter to simplify signatures
type BybitRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Connection settings for the Bybit REST API
#[derive(Debug, Clone)]
pub struct BybitConfig {
    pub api_key: String,
    pub api_secret: String,
    pub testnet: bool,
    pub recv_window_ms: u64,
    pub requests_per_second: u32,
    pub base_url: Option<String>, // Overrides the mainnet/testnet URL
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            testnet: true,
            recv_window_ms: 5000,
            requests_per_second: 10,
            base_url: None,
        }
    }
}

impl BybitConfig {
    pub fn base_url(&self) -> &str {
        match &self.base_url {
            Some(url) => url.as_str(),
            None if self.testnet => BYBIT_TESTNET_REST,
            None => BYBIT_MAINNET_REST,
        }
    }
}

/// Common envelope of every v5 response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct WalletBalanceResult {
    #[serde(default)]
    list: Vec<WalletAccount>,
}

#[derive(Debug, Deserialize)]
struct WalletAccount {
    #[serde(default)]
    coin: Vec<WalletCoin>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletCoin {
    coin: String,
    #[serde(default)]
    wallet_balance: String,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResult {
    #[serde(default)]
    list: Vec<Instrument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    symbol: String,
    #[serde(default)]
    lot_size_filter: LotSizeFilter,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LotSizeFilter {
    qty_step: Option<String>,
    base_precision: Option<String>,
    min_order_qty: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResult {
    #[serde(default)]
    order_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest<'a> {
    category: &'static str,
    symbol: &'a str,
    side: &'static str,
    order_type: &'static str,
    qty: String,
    market_unit: &'static str,
    time_in_force: &'static str,
}

/// Bybit spot account gateway
///
/// This struct is cloneable to allow sharing across async tasks.
/// All clones share the same rate limiter.
#[derive(Clone)]
pub struct BybitGateway {
    client: Client,
    config: BybitConfig,
    rate_limiter: Arc<BybitRateLimiter>,
}

impl BybitGateway {
    pub fn new(config: BybitConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    /// HMAC-SHA256 over `timestamp + api_key + recv_window + payload`, hex encoded
    pub fn sign(&self, timestamp: i64, payload: &str) -> Result<String, GatewayError> {
        let sign_str = format!(
            "{}{}{}{}",
            timestamp, self.config.api_key, self.config.recv_window_ms, payload
        );

        let mut mac = Hmac::<Sha256>::new_from_slice(self.config.api_secret.as_bytes())
            .map_err(|_| GatewayError::MissingCredentials)?;
        mac.update(sign_str.as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn auth_headers(
        &self,
        request: reqwest::RequestBuilder,
        payload: &str,
    ) -> Result<reqwest::RequestBuilder, GatewayError> {
        if self.config.api_key.is_empty() || self.config.api_secret.is_empty() {
            return Err(GatewayError::MissingCredentials);
        }

        let timestamp = Utc::now().timestamp_millis();
        let signature = self.sign(timestamp, payload)?;

        Ok(request
            .header("X-BAPI-API-KEY", &self.config.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.config.recv_window_ms.to_string())
            .header("X-BAPI-SIGN", signature))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<ApiResponse<T>, GatewayError> {
        self.rate_limiter.until_ready().await;

        let text = request.send().await?.text().await?;
        tracing::debug!(response = %text, "Bybit response");

        Ok(serde_json::from_str(&text)?)
    }

    fn into_result<T>(response: ApiResponse<T>) -> Result<T, GatewayError> {
        if response.ret_code != 0 {
            return Err(GatewayError::Api {
                code: response.ret_code,
                message: response.ret_msg,
            });
        }
        response.result.ok_or_else(|| GatewayError::Api {
            code: response.ret_code,
            message: "empty result".to_string(),
        })
    }
}

fn parse_number(value: &str, field: &str) -> Result<f64, GatewayError> {
    if value.is_empty() {
        return Ok(0.0);
    }
    value
        .parse()
        .map_err(|_| GatewayError::InvalidValue(format!("{} = {:?}", field, value)))
}

#[async_trait]
impl AccountGateway for BybitGateway {
    async fn get_balance(&self) -> Result<Balance, GatewayError> {
        let query = "accountType=UNIFIED";
        let url = format!("{}/v5/account/wallet-balance?{}", self.config.base_url(), query);
        let request = self.auth_headers(self.client.get(&url), query)?;

        let result: WalletBalanceResult = Self::into_result(self.send(request).await?)?;

        let mut balance = Balance::default();
        for coin in result.list.iter().flat_map(|account| &account.coin) {
            let amount = parse_number(&coin.wallet_balance, "walletBalance")?;
            balance = balance.with(&coin.coin, amount);
        }

        Ok(balance)
    }

    async fn get_quantity_constraints(
        &self,
        symbol: &str,
    ) -> Result<QuantityConstraints, GatewayError> {
        let url = format!(
            "{}/v5/market/instruments-info?category=spot&symbol={}",
            self.config.base_url(),
            symbol
        );

        let result: InstrumentsResult =
            Self::into_result(self.send(self.client.get(&url)).await?)?;

        let instrument = result
            .list
            .into_iter()
            .find(|i| i.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| GatewayError::UnknownSymbol(symbol.to_string()))?;

        let filter = instrument.lot_size_filter;
        let step = filter
            .qty_step
            .or(filter.base_precision)
            .unwrap_or_else(|| "1".to_string());
        let min_quantity = filter.min_order_qty.unwrap_or_else(|| "1".to_string());

        Ok(QuantityConstraints::new(
            parse_number(&step, "qtyStep")?,
            parse_number(&min_quantity, "minOrderQty")?,
        ))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: f64,
    ) -> Result<OrderOutcome, GatewayError> {
        let body = OrderRequest {
            category: "spot",
            symbol,
            side: side.as_str(),
            order_type: "Market",
            qty: quantity.to_string(),
            market_unit: "baseCoin",
            time_in_force: "IOC",
        };
        let payload = serde_json::to_string(&body)?;

        let url = format!("{}/v5/order/create", self.config.base_url());
        let request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(payload.clone());
        let request = self.auth_headers(request, &payload)?;

        let response: ApiResponse<OrderResult> = self.send(request).await?;

        if response.ret_code != 0 {
            tracing::warn!(
                symbol = %symbol,
                side = %side,
                code = response.ret_code,
                message = %response.ret_msg,
                "Order rejected"
            );
            return Ok(OrderOutcome::Rejected {
                message: response.ret_msg,
            });
        }

        let order_id = response.result.unwrap_or_default().order_id;
        tracing::info!(
            symbol = %symbol,
            side = %side,
            quantity = %quantity,
            order_id = %order_id,
            "Order placed"
        );

        Ok(OrderOutcome::Filled { order_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn gateway_for(server: &Server) -> BybitGateway {
        BybitGateway::new(BybitConfig {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            base_url: Some(server.url()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_base_url_selection() {
        let testnet = BybitConfig::default();
        assert_eq!(testnet.base_url(), BYBIT_TESTNET_REST);

        let mainnet = BybitConfig {
            testnet: false,
            ..Default::default()
        };
        assert_eq!(mainnet.base_url(), BYBIT_MAINNET_REST);
    }

    #[test]
    fn test_signature_is_deterministic_hex() {
        let gateway = BybitGateway::new(BybitConfig {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            ..Default::default()
        })
        .unwrap();

        let first = gateway.sign(1_700_000_000_000, "accountType=UNIFIED").unwrap();
        let second = gateway.sign(1_700_000_000_000, "accountType=UNIFIED").unwrap();
        let other = gateway.sign(1_700_000_000_001, "accountType=UNIFIED").unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_get_balance() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v5/account/wallet-balance")
            .match_query(Matcher::UrlEncoded(
                "accountType".into(),
                "UNIFIED".into(),
            ))
            .match_header("X-BAPI-API-KEY", "key")
            .match_header("X-BAPI-SIGN", Matcher::Regex("^[0-9a-f]{64}$".into()))
            .with_status(200)
            .with_body(
                r#"{"retCode":0,"retMsg":"OK","result":{"list":[{"coin":[
                    {"coin":"USDT","walletBalance":"1234.5"},
                    {"coin":"BTC","walletBalance":""}
                ]}]}}"#,
            )
            .create_async()
            .await;

        let balance = gateway_for(&server).get_balance().await.unwrap();

        mock.assert_async().await;
        assert_eq!(balance.get("USDT"), Some(1234.5));
        assert_eq!(balance.get("BTC"), Some(0.0));
    }

    #[tokio::test]
    async fn test_get_balance_api_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v5/account/wallet-balance")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"retCode":10003,"retMsg":"API key is invalid.","result":{}}"#)
            .create_async()
            .await;

        let result = gateway_for(&server).get_balance().await;
        assert!(matches!(result, Err(GatewayError::Api { code: 10003, .. })));
    }

    #[tokio::test]
    async fn test_balance_requires_credentials() {
        let gateway = BybitGateway::new(BybitConfig::default()).unwrap();
        let result = gateway.get_balance().await;
        assert!(matches!(result, Err(GatewayError::MissingCredentials)));
    }

    #[tokio::test]
    async fn test_get_quantity_constraints() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v5/market/instruments-info")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("category".into(), "spot".into()),
                Matcher::UrlEncoded("symbol".into(), "SOLUSDT".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"retCode":0,"retMsg":"OK","result":{"list":[
                    {"symbol":"SOLUSDT","lotSizeFilter":{"basePrecision":"0.001","minOrderQty":"0.01"}}
                ]}}"#,
            )
            .create_async()
            .await;

        let constraints = gateway_for(&server)
            .get_quantity_constraints("SOLUSDT")
            .await
            .unwrap();

        assert_eq!(constraints.step, 0.001);
        assert_eq!(constraints.min_quantity, 0.01);
        assert_eq!(constraints.precision(), 3);
    }

    #[tokio::test]
    async fn test_unknown_symbol() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v5/market/instruments-info")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"retCode":0,"retMsg":"OK","result":{"list":[]}}"#)
            .create_async()
            .await;

        let result = gateway_for(&server).get_quantity_constraints("NOPEUSDT").await;
        assert!(matches!(result, Err(GatewayError::UnknownSymbol(s)) if s == "NOPEUSDT"));
    }

    #[tokio::test]
    async fn test_place_market_order_filled() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v5/order/create")
            .match_body(Matcher::PartialJsonString(
                r#"{"category":"spot","symbol":"SOLUSDT","side":"Buy","orderType":"Market","qty":"0.5"}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"retCode":0,"retMsg":"OK","result":{"orderId":"1321003749386327552"}}"#)
            .create_async()
            .await;

        let outcome = gateway_for(&server)
            .place_market_order("SOLUSDT", TradeSide::Buy, 0.5)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            outcome,
            OrderOutcome::Filled {
                order_id: "1321003749386327552".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_place_market_order_rejected() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v5/order/create")
            .with_status(200)
            .with_body(r#"{"retCode":170131,"retMsg":"Insufficient balance.","result":{}}"#)
            .create_async()
            .await;

        let outcome = gateway_for(&server)
            .place_market_order("SOLUSDT", TradeSide::Sell, 1.0)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            OrderOutcome::Rejected {
                message: "Insufficient balance.".to_string()
            }
        );
    }
}
