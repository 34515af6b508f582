//! Telegram trade alerts.
//!
//! Best effort: failures are logged and never reach the trading path.
//! Without a bot token and chat id every call is a no-op.

use crate::config::AlertConfig;
use crate::exchange::OrderSide;
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Telegram bot client.
pub struct Alerter {
    http: Client,
    config: AlertConfig,
}

impl Alerter {
    pub fn new(config: &AlertConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Deliver one message, returning any failure.
    #[instrument(skip(self, text))]
    pub async fn send(&self, text: &str) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        );
        let response = self
            .http
            .get(&url)
            .query(&[
                ("chat_id", self.config.chat_id.as_str()),
                ("parse_mode", "Markdown"),
                ("text", text),
            ])
            .send()
            .await
            .context("Failed to reach Telegram")?;

        let status = response.status();
        anyhow::ensure!(status.is_success(), "Telegram returned HTTP {}", status);
        debug!("Alert delivered");
        Ok(())
    }

    /// Deliver one message, logging failures.
    pub async fn notify(&self, text: &str) {
        if let Err(e) = self.send(text).await {
            warn!(error = %e, "⚠️  [ALERT] Delivery failed");
        }
    }
}

/// Alert text for a confirmed fill.
pub fn fill_message(side: OrderSide, price: f64, quote_value: f64, mean: f64) -> String {
    match side {
        OrderSide::Buy => format!("B: {:.2}, -{:.2}, mean: {:.2}", price, quote_value, mean),
        OrderSide::Sell => format!("S: {:.2}, {:.2}, mean: {:.2}", price, quote_value, mean),
    }
}

/// Alert text for the periodic fee summary.
pub fn fee_summary_message(fills: u64, volume: f64, fees: f64, stable: &str) -> String {
    format!(
        "Fees: {} fills, volume {:.2} {}, paid {:.4} {}",
        fills, volume, stable, fees, stable
    )
}
