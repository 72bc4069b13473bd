//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for bridge credentials and webhook URLs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::anchor::WeekendPolicy;
use crate::Symbol;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    /// Per-symbol instrument parameters, keyed by symbol
    #[serde(default = "default_symbol_configs")]
    pub symbols: HashMap<String, SymbolConfig>,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bridge: BridgeConfig::default(),
            schedule: ScheduleConfig::default(),
            trading: TradingConfig::default(),
            symbols: default_symbol_configs(),
            watchdog: WatchdogConfig::default(),
            notify: NotifyConfig::default(),
            state: StateConfig::default(),
            backtest: BacktestConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env();
        Ok(config)
    }

    /// Overlay secrets from the environment on top of the file values
    pub fn apply_env(&mut self) {
        if let Ok(base_url) = std::env::var("BRIDGE_BASE_URL") {
            self.bridge.base_url = base_url;
        }
        if let Ok(api_key) = std::env::var("BRIDGE_API_KEY") {
            self.bridge.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var("BRIDGE_API_SECRET") {
            self.bridge.api_secret = Some(api_secret);
        }
        if let Ok(url) = std::env::var("DISCORD_WEBHOOK_INFO") {
            self.notify.info_webhook = Some(url);
        }
        if let Ok(url) = std::env::var("DISCORD_WEBHOOK_ALERT") {
            self.notify.alert_webhook = Some(url);
        }
        if let Ok(url) = std::env::var("DISCORD_WEBHOOK_CRITICAL") {
            self.notify.critical_webhook = Some(url);
        }
        if let Ok(url) = std::env::var("DISCORD_WEBHOOK_TRADE") {
            self.notify.trade_webhook = Some(url);
        }
    }

    /// Instrument parameters for one symbol
    pub fn symbol_config(&self, symbol: &str) -> Result<&SymbolConfig> {
        self.symbols
            .get(symbol)
            .with_context(|| format!("No configuration for symbol {symbol}"))
    }
}

/// Bridge service connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    /// Maximum requests per second against the bridge
    pub rate_limit: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            base_url: "http://127.0.0.1:8787".to_string(),
            api_key: None,
            api_secret: None,
            rate_limit: 10,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// Daily anchor schedule
///
/// `hour`/`minute` are wall-clock time in the display time zone; the resolver
/// converts them to server time before searching for the anchor bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub hour: u32,
    pub minute: u32,
    pub display_timezone: String,
    pub server_timezone: String,
    pub weekend_policy: WeekendPolicy,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            hour: 3,
            minute: 30,
            display_timezone: "Asia/Kolkata".to_string(),
            server_timezone: "Etc/GMT-3".to_string(),
            weekend_policy: WeekendPolicy::PreviousTradingDay,
        }
    }
}

impl ScheduleConfig {
    pub fn server_tz(&self) -> Result<chrono_tz::Tz> {
        self.server_timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid server timezone {:?}: {e}", self.server_timezone))
    }

    pub fn display_tz(&self) -> Result<chrono_tz::Tz> {
        self.display_timezone
            .parse()
            .map_err(|e| {
                anyhow::anyhow!("Invalid display timezone {:?}: {e}", self.display_timezone)
            })
    }
}

/// Live trading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Symbols tracked by the live loop
    pub symbols: Vec<String>,
    /// When true, decisions are journaled but never reach the gateway
    pub dry_run: bool,
    pub poll_interval_secs: u64,
    /// Order comments start with this tag so the bot can find its own trades
    pub comment_prefix: String,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbols: vec!["XAUUSD".to_string(), "XAGUSD".to_string()],
            dry_run: true,
            poll_interval_secs: 1,
            comment_prefix: "Astra".to_string(),
        }
    }
}

impl TradingConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols
            .iter()
            .map(|s| Symbol::new(s.clone()))
            .collect()
    }
}

/// Per-symbol instrument parameters for live trading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    pub threshold_pips: u32,
    pub pip_size: f64,
    pub lot_size: f64,
    pub max_trades_per_day: u32,
    /// Symbols with `is_tradeable = false` are evaluated and journaled but
    /// never sent to the gateway
    pub is_tradeable: bool,
}

fn symbol_config(
    symbol: &str,
    threshold_pips: u32,
    pip_size: f64,
    is_tradeable: bool,
) -> (String, SymbolConfig) {
    (
        symbol.to_string(),
        SymbolConfig {
            symbol: symbol.to_string(),
            threshold_pips,
            pip_size,
            lot_size: 0.5,
            max_trades_per_day: 6,
            is_tradeable,
        },
    )
}

/// Instrument table of the original deployment
fn default_symbol_configs() -> HashMap<String, SymbolConfig> {
    HashMap::from([
        symbol_config("EURUSD", 15, 0.0001, false),
        symbol_config("GBPUSD", 15, 0.0001, false),
        symbol_config("XAGUSD", 300, 0.001, false),
        symbol_config("XAUUSD", 400, 0.01, true),
        symbol_config("USDJPY", 20, 0.01, true),
    ])
}

/// Daily PnL watchdog limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Lock the day once total PnL reaches this many account-currency units
    pub profit_limit_usd: f64,
    /// Optional downside lock; disabled when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss_limit_usd: Option<f64>,
    /// Add floating PnL of open bot positions to the realized total
    pub include_open_pnl: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig {
            profit_limit_usd: 300.0,
            loss_limit_usd: None,
            include_open_pnl: true,
        }
    }
}

/// Webhook notification configuration
///
/// Webhook URLs are secrets and normally come from the environment
/// (`DISCORD_WEBHOOK_INFO` and friends); the file fields exist for tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_webhook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_webhook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical_webhook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_webhook: Option<String>,
    pub max_per_window: u32,
    pub window_secs: u64,
    pub cooldown_secs: u64,
    pub dedup_ttl_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            info_webhook: None,
            alert_webhook: None,
            critical_webhook: None,
            trade_webhook: None,
            max_per_window: 5,
            window_secs: 60,
            cooldown_secs: 15,
            dedup_ttl_secs: 45,
        }
    }
}

/// State store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            db_path: "anchor_trader.db".to_string(),
        }
    }
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub data_dir: String,
    pub results_dir: String,
    /// Per-symbol replay parameters, keyed by symbol
    #[serde(default = "default_backtest_symbol_configs")]
    pub symbols: HashMap<String, BacktestSymbolConfig>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_dir: "data".to_string(),
            results_dir: "results".to_string(),
            symbols: default_backtest_symbol_configs(),
        }
    }
}

/// Per-symbol parameters for the hedge-policy replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSymbolConfig {
    pub symbol: String,
    pub threshold_pips: f64,
    pub pip_size: f64,
    pub lot_size: f64,
    pub pip_value_per_lot: f64,
    /// Solo exit level as a multiple of the first threshold
    pub t2_multiple: f64,
    /// Entries are skipped once price has overshot T1 by this factor
    pub spike_tolerance: f64,
    pub hedge_min_move_pips: f64,
    pub hedge_close_pref: f64,
    pub hedge_close_spike: f64,
    pub max_trades_per_day: u32,
}

impl BacktestSymbolConfig {
    pub fn new(symbol: &str, threshold_pips: f64, pip_size: f64, pip_value_per_lot: f64) -> Self {
        BacktestSymbolConfig {
            symbol: symbol.to_string(),
            threshold_pips,
            pip_size,
            lot_size: 0.5,
            pip_value_per_lot,
            t2_multiple: 2.0,
            spike_tolerance: 1.25,
            hedge_min_move_pips: 5.0,
            hedge_close_pref: 25.0,
            hedge_close_spike: 50.0,
            max_trades_per_day: 6,
        }
    }
}

fn default_backtest_symbol_configs() -> HashMap<String, BacktestSymbolConfig> {
    [
        BacktestSymbolConfig::new("EURUSD", 15.0, 0.0001, 10.0),
        BacktestSymbolConfig::new("GBPUSD", 15.0, 0.0001, 10.0),
        BacktestSymbolConfig::new("USDJPY", 20.0, 0.01, 9.1),
        BacktestSymbolConfig::new("XAGUSD", 300.0, 0.001, 5.0),
        BacktestSymbolConfig::new("XAUUSD", 20.0, 0.1, 10.0),
    ]
    .into_iter()
    .map(|cfg| (cfg.symbol.clone(), cfg))
    .collect()
}
