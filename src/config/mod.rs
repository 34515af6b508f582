//! Configuration management for the volatility harvester.
//!
//! Loads settings from an optional `config` file and `VH__`-prefixed
//! environment variables (e.g. `VH__STRATEGY__MA_LENGTH=24`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Traded pair
    #[serde(default)]
    pub pair: PairConfig,
    /// Signal and rebalance parameters
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Order threshold scaling
    #[serde(default)]
    pub scaling: ScalingConfig,
    /// Order submission and retry behaviour
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Task intervals and data locations
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Telegram alerts
    #[serde(default)]
    pub alert: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairConfig {
    /// Volatile asset (e.g. "BTC")
    #[serde(default = "default_base_asset")]
    pub base_asset: String,
    /// Stable asset (e.g. "USDC")
    #[serde(default = "default_stable_asset")]
    pub stable_asset: String,
}

impl PairConfig {
    /// Exchange symbol, e.g. "BTCUSDC".
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base_asset, self.stable_asset)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Moving average period, in candles
    #[serde(default = "default_ma_length")]
    pub ma_length: usize,
    /// Working range as a percentage of the all-time high
    #[serde(default = "default_range_percent")]
    pub range_percent: f64,
    /// Lower bound of the target volatile ratio (0.0-1.0)
    #[serde(default = "default_min_ratio")]
    pub min_ratio: f64,
    /// Upper bound of the target volatile ratio (0.0-1.0)
    #[serde(default = "default_max_ratio")]
    pub max_ratio: f64,
    /// Minimum deviation (%) before a buy rebalance
    #[serde(default = "default_buy_rebalance_percent")]
    pub buy_rebalance_percent: f64,
    /// Minimum deviation (%) before a sell rebalance
    #[serde(default = "default_sell_rebalance_percent")]
    pub sell_rebalance_percent: f64,
    /// Taker fee in percent per side
    #[serde(default = "default_fee_percent")]
    pub fee_percent: f64,
    /// Local amplitude window in seconds
    #[serde(default = "default_amplitude_window_secs")]
    pub amplitude_window_secs: u64,
    /// Impulse delta pool length in minutes
    #[serde(default = "default_impulse_window_minutes")]
    pub impulse_window_minutes: u32,
    /// Buys are skipped while the slow-line slope is below this
    #[serde(default = "default_buy_trend_floor")]
    pub buy_trend_floor: f64,
    /// Sells are skipped while the slow-line slope is above this
    #[serde(default = "default_sell_trend_ceiling")]
    pub sell_trend_ceiling: f64,
    /// Price move that triggers a state checkpoint
    #[serde(default = "default_checkpoint_price_move")]
    pub checkpoint_price_move: f64,
    /// Volatile holdings worth less than this (stable units) count as flat
    #[serde(default = "default_dust_value")]
    pub dust_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    Fibonacci,
    Linear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_scale_mode")]
    pub mode: ScaleMode,
    /// Number of scaling steps
    #[serde(default = "default_scale_length")]
    pub length: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum submission attempts per order
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Quantity multiplier after an insufficient-balance rejection
    #[serde(default = "default_shrink_factor")]
    pub shrink_factor: f64,
    /// Delay after a transport failure
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Delay after an insufficient-balance rejection
    #[serde(default = "default_insufficient_balance_delay_ms")]
    pub insufficient_balance_delay_ms: u64,
    /// Give up when the spendable balance falls below this
    #[serde(default = "default_balance_floor")]
    pub balance_floor: f64,
    /// Pause after an attempted rebalance
    #[serde(default = "default_post_trade_pause_secs")]
    pub post_trade_pause_secs: u64,
    /// Timeout applied to every gateway call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Directory for the state snapshot, price history and journal
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_eval_interval_ms")]
    pub eval_interval_ms: u64,
    #[serde(default = "default_balance_poll_secs")]
    pub balance_poll_secs: u64,
    #[serde(default = "default_snapshot_secs")]
    pub snapshot_secs: u64,
    /// Delay between the first price and the first evaluation
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,
    /// Backoff between failed candle fetches at startup
    #[serde(default = "default_candle_retry_secs")]
    pub candle_retry_secs: u64,
    /// Interval of the fee summary alert
    #[serde(default = "default_fee_summary_secs")]
    pub fee_summary_secs: u64,
    /// Candle interval requested at startup, in minutes
    #[serde(default = "default_candle_interval_minutes")]
    pub candle_interval_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Telegram bot token; alerts are disabled when empty
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default = "default_alert_api_base")]
    pub api_base: String,
}

impl AlertConfig {
    pub fn is_enabled(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

// Default value functions
fn default_base_asset() -> String {
    "BTC".to_string()
}

fn default_stable_asset() -> String {
    "USDC".to_string()
}

fn default_ma_length() -> usize {
    24
}

fn default_range_percent() -> f64 {
    50.0 // working range = half the ATH
}

fn default_min_ratio() -> f64 {
    0.0
}

fn default_max_ratio() -> f64 {
    0.9
}

fn default_buy_rebalance_percent() -> f64 {
    1.5
}

fn default_sell_rebalance_percent() -> f64 {
    3.0
}

fn default_fee_percent() -> f64 {
    0.1
}

fn default_amplitude_window_secs() -> u64 {
    7200 // 2h of 1m candles
}

fn default_impulse_window_minutes() -> u32 {
    3
}

fn default_buy_trend_floor() -> f64 {
    -1.0
}

fn default_sell_trend_ceiling() -> f64 {
    0.0
}

fn default_checkpoint_price_move() -> f64 {
    30.0
}

fn default_dust_value() -> f64 {
    11.0
}

fn default_scale_mode() -> ScaleMode {
    ScaleMode::Fibonacci
}

fn default_scale_length() -> u32 {
    8
}

fn default_max_attempts() -> u32 {
    20
}

fn default_shrink_factor() -> f64 {
    0.99
}

fn default_retry_delay_ms() -> u64 {
    1100
}

fn default_insufficient_balance_delay_ms() -> u64 {
    2000
}

fn default_balance_floor() -> f64 {
    7.0
}

fn default_post_trade_pause_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_eval_interval_ms() -> u64 {
    300
}

fn default_balance_poll_secs() -> u64 {
    22
}

fn default_snapshot_secs() -> u64 {
    30
}

fn default_warmup_secs() -> u64 {
    7
}

fn default_candle_retry_secs() -> u64 {
    4
}

fn default_fee_summary_secs() -> u64 {
    86_400
}

fn default_candle_interval_minutes() -> u32 {
    1
}

fn default_alert_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("VH"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;
        anyhow::ensure!(
            (0.0..=1.0).contains(&s.min_ratio)
                && (0.0..=1.0).contains(&s.max_ratio)
                && s.min_ratio <= s.max_ratio,
            "ratio bounds must satisfy 0 <= min_ratio <= max_ratio <= 1"
        );

        anyhow::ensure!(s.ma_length >= 1, "ma_length must be >= 1");

        anyhow::ensure!(
            s.range_percent > 0.0,
            "range_percent must be positive"
        );

        anyhow::ensure!(
            s.fee_percent >= 0.0 && s.fee_percent < 100.0,
            "fee_percent must be between 0 and 100"
        );

        anyhow::ensure!(
            self.execution.max_attempts >= 1,
            "max_attempts must be >= 1"
        );

        anyhow::ensure!(
            self.execution.shrink_factor > 0.0 && self.execution.shrink_factor < 1.0,
            "shrink_factor must be between 0 and 1"
        );

        let r = &self.runtime;
        for (name, value) in [
            ("eval_interval_ms", r.eval_interval_ms),
            ("balance_poll_secs", r.balance_poll_secs),
            ("snapshot_secs", r.snapshot_secs),
            ("fee_summary_secs", r.fee_summary_secs),
            ("candle_retry_secs", r.candle_retry_secs),
        ] {
            anyhow::ensure!(value > 0, "runtime.{} must be > 0", name);
        }

        Ok(())
    }
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            base_asset: default_base_asset(),
            stable_asset: default_stable_asset(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            ma_length: default_ma_length(),
            range_percent: default_range_percent(),
            min_ratio: default_min_ratio(),
            max_ratio: default_max_ratio(),
            buy_rebalance_percent: default_buy_rebalance_percent(),
            sell_rebalance_percent: default_sell_rebalance_percent(),
            fee_percent: default_fee_percent(),
            amplitude_window_secs: default_amplitude_window_secs(),
            impulse_window_minutes: default_impulse_window_minutes(),
            buy_trend_floor: default_buy_trend_floor(),
            sell_trend_ceiling: default_sell_trend_ceiling(),
            checkpoint_price_move: default_checkpoint_price_move(),
            dust_value: default_dust_value(),
        }
    }
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: default_scale_mode(),
            length: default_scale_length(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            shrink_factor: default_shrink_factor(),
            retry_delay_ms: default_retry_delay_ms(),
            insufficient_balance_delay_ms: default_insufficient_balance_delay_ms(),
            balance_floor: default_balance_floor(),
            post_trade_pause_secs: default_post_trade_pause_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            eval_interval_ms: default_eval_interval_ms(),
            balance_poll_secs: default_balance_poll_secs(),
            snapshot_secs: default_snapshot_secs(),
            warmup_secs: default_warmup_secs(),
            candle_retry_secs: default_candle_retry_secs(),
            fee_summary_secs: default_fee_summary_secs(),
            candle_interval_minutes: default_candle_interval_minutes(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: default_alert_api_base(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pair.symbol(), "BTCUSDC");
        assert!(!config.alert.is_enabled());
    }

    #[test]
    fn test_rejects_inverted_ratio_bounds() {
        let mut config = Config::default();
        config.strategy.min_ratio = 0.8;
        config.strategy.max_ratio = 0.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_intervals() {
        let mut config = Config::default();
        config.runtime.eval_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("eval_interval_ms"));

        let mut config = Config::default();
        config.runtime.snapshot_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.runtime.fee_summary_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.runtime.balance_poll_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"strategy": {"ma_length": 48}, "scaling": {"enabled": true, "mode": "linear"}}"#,
        )
        .unwrap();
        assert_eq!(config.strategy.ma_length, 48);
        assert_eq!(config.strategy.max_ratio, 0.9);
        assert_eq!(config.scaling.mode, ScaleMode::Linear);
        assert_eq!(config.scaling.length, 8);
        assert_eq!(config.execution.max_attempts, 20);
    }
}
