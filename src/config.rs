// Layered settings: defaults, optional TOML file, TICKBOT__* environment
use anyhow::{bail, Context};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::execution::SessionConfig;
use crate::feed::FeedConfig;
use crate::gateway::BybitConfig;
use crate::strategy::{EntryConfig, ExitConfig};

pub const ENV_PREFIX: &str = "TICKBOT";
pub const DEFAULT_CONFIG_FILE: &str = "tickbot.toml";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExchangeSettings {
    pub api_key: String,
    pub api_secret: String,
    pub testnet: bool,
    pub quote_asset: String,
    pub recv_window_ms: u64,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            testnet: true,
            quote_asset: "USDT".to_string(),
            recv_window_ms: 5000,
        }
    }
}

/// Strategy and risk parameters shared by every session
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MomentumSettings {
    pub capital_per_trade: f64,
    pub rsi_entry_threshold: f64,
    pub take_profit_pct: f64,
    pub trailing_stop_pct: f64,
    pub stop_loss_pct: f64,
    pub max_hold_secs: i64,
    pub cooldown_secs: i64,
    pub max_drawdown_pct: f64, // Negative, e.g. -5.0
}

impl Default for MomentumSettings {
    fn default() -> Self {
        Self {
            capital_per_trade: 50.0,
            rsi_entry_threshold: 35.0,
            take_profit_pct: 2.5,
            trailing_stop_pct: 1.2,
            stop_loss_pct: 2.0,
            max_hold_secs: 120,
            cooldown_secs: 300,
            max_drawdown_pct: -5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedSettings {
    pub reconnect_delay_secs: u64,
    pub ping_interval_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: 5,
            ping_interval_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub pairs: Vec<String>,
    pub momentum: MomentumSettings,
    pub feed: FeedSettings,
    pub journal_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exchange: ExchangeSettings::default(),
            pairs: vec!["BTCUSDT".to_string()],
            momentum: MomentumSettings::default(),
            feed: FeedSettings::default(),
            journal_path: PathBuf::from("logs/trades.jsonl"),
        }
    }
}

impl Settings {
    /// Load from `path` (if it exists) and the process environment
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`Settings::load`], reading variables from `env` instead of the
    /// process environment when given
    pub fn load_with_env(
        path: &Path,
        env: Option<HashMap<String, String>>,
    ) -> anyhow::Result<Self> {
        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("pairs")
            .try_parsing(true)
            .source(env);

        let settings: Settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(environment)
            .build()
            .with_context(|| format!("Failed to read settings from {}", path.display()))?
            .try_deserialize()
            .context("Invalid settings")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pairs.is_empty() {
            bail!("At least one trading pair is required");
        }
        if self.momentum.capital_per_trade <= 0.0 {
            bail!(
                "capital_per_trade must be positive, got {}",
                self.momentum.capital_per_trade
            );
        }
        if self.momentum.max_drawdown_pct >= 0.0 {
            bail!(
                "max_drawdown_pct must be negative, got {}",
                self.momentum.max_drawdown_pct
            );
        }
        Ok(())
    }

    /// Pairs normalised to exchange symbols, duplicates removed
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = Vec::new();
        for pair in &self.pairs {
            let symbol = pair.trim().to_uppercase();
            if !symbol.is_empty() && !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        symbols
    }

    pub fn entry_config(&self) -> EntryConfig {
        EntryConfig {
            rsi_entry_threshold: self.momentum.rsi_entry_threshold,
            cooldown: chrono::Duration::seconds(self.momentum.cooldown_secs),
            ..EntryConfig::default()
        }
    }

    pub fn exit_config(&self) -> ExitConfig {
        ExitConfig {
            take_profit_pct: self.momentum.take_profit_pct,
            stop_loss_pct: self.momentum.stop_loss_pct,
            base_trailing_stop_pct: self.momentum.trailing_stop_pct,
            max_hold: chrono::Duration::seconds(self.momentum.max_hold_secs),
            ..ExitConfig::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            capital_per_trade: self.momentum.capital_per_trade,
            quote_asset: self.exchange.quote_asset.clone(),
            ..SessionConfig::default()
        }
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            testnet: self.exchange.testnet,
            reconnect_delay: Duration::from_secs(self.feed.reconnect_delay_secs),
            ping_interval: Duration::from_secs(self.feed.ping_interval_secs),
            ..FeedConfig::default()
        }
    }

    pub fn bybit_config(&self) -> BybitConfig {
        BybitConfig {
            api_key: self.exchange.api_key.clone(),
            api_secret: self.exchange.api_secret.clone(),
            testnet: self.exchange.testnet,
            recv_window_ms: self.exchange.recv_window_ms,
            ..BybitConfig::default()
        }
    }
}
