//! Target-ratio portfolio model.
//!
//! The target share of the volatile asset drifts against price: it rises as
//! price falls and shrinks as price rises, normalized by a working range
//! derived from the all-time high. The gap between actual and target
//! holdings is the rebalance amount.

use crate::config::StrategyConfig;
use crate::exchange::OrderSide;
use crate::utils::safe_div;
use serde::Serialize;
use tracing::{debug, info};

/// Stable-unit notional used for the break-even range estimate.
const NOTIONAL_UNIT: f64 = 1000.0;

/// Persisted subset of the portfolio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioState {
    pub volatile_qty: f64,
    pub stable_qty: f64,
    pub pair_balance: f64,
    pub traded_price: f64,
    pub buy_price_mean: f64,
    pub portfolio_ratio: f64,
    pub real_ratio: f64,
    pub ath: Option<f64>,
    pub working_range: f64,
    pub percent_diff: f64,
    pub trade_profit: f64,
    pub price_diff: f64,
}

#[derive(Debug, Clone)]
pub struct PortfolioModel {
    min_ratio: f64,
    max_ratio: f64,
    range_percent: f64,
    /// Per-side fee as a fraction
    fee: f64,
    volatile_qty: f64,
    stable_qty: f64,
    pub traded_price: f64,
    pub buy_price_mean: f64,
    pub portfolio_ratio: f64,
    real_ratio: f64,
    ath: Option<f64>,
    working_range: f64,
    trade_profit: f64,
    percent_diff: f64,
    price_diff: f64,
    last_price: Option<f64>,
}

impl PortfolioModel {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            min_ratio: config.min_ratio,
            max_ratio: config.max_ratio,
            range_percent: config.range_percent,
            fee: config.fee_percent / 100.0,
            volatile_qty: 0.0,
            stable_qty: 0.0,
            traded_price: 0.0,
            buy_price_mean: 0.0,
            portfolio_ratio: config.min_ratio,
            real_ratio: 0.0,
            ath: None,
            working_range: 0.0,
            trade_profit: 0.0,
            percent_diff: 0.0,
            price_diff: 0.0,
            last_price: None,
        }
    }

    fn clamp_ratio(&self, ratio: f64) -> f64 {
        ratio.clamp(self.min_ratio, self.max_ratio)
    }

    pub fn set_balances(&mut self, volatile_qty: f64, stable_qty: f64) {
        self.volatile_qty = volatile_qty;
        self.stable_qty = stable_qty;
    }

    pub fn balances(&self) -> (f64, f64) {
        (self.volatile_qty, self.stable_qty)
    }

    pub fn has_balance(&self) -> bool {
        self.volatile_qty > 0.0 || self.stable_qty > 0.0
    }

    /// Raise the all-time high if `price` exceeds it and refresh the range.
    pub fn update_ath(&mut self, price: f64) {
        if self.ath.map_or(true, |ath| price > ath) {
            self.ath = Some(price);
            self.working_range = price * self.range_percent / 100.0;
            debug!(ath = price, working_range = self.working_range, "ATH updated");
        }
    }

    pub fn ath(&self) -> Option<f64> {
        self.ath
    }

    pub fn working_range(&self) -> f64 {
        self.working_range
    }

    /// Shift `current_ratio` by the price move since the previous sample.
    ///
    /// Without a known ATH there is no range to normalize against and the
    /// result is `1.0` clamped to the ratio bounds.
    pub fn drift_ratio(&mut self, price: f64, current_ratio: f64) -> f64 {
        if self.ath.is_none() {
            return self.clamp_ratio(1.0);
        }
        self.update_ath(price);

        let previous = self.last_price.replace(price).unwrap_or(price);
        let shift = safe_div(previous - price, self.working_range);
        self.clamp_ratio(current_ratio + shift)
    }

    /// Recompute rebalance metrics for `price` against `self.portfolio_ratio`.
    pub fn calculate_profit(&mut self, price: f64) {
        let current = self.volatile_qty * price;
        let total = current + self.stable_qty;
        if total <= 0.0 {
            return;
        }
        let target = total * self.portfolio_ratio;

        self.trade_profit = current - target;
        self.percent_diff = self.trade_profit / total * 100.0;
        self.price_diff = price - self.traded_price;
        self.real_ratio = current / total * 100.0;
    }

    /// Per-tick update: drift the target ratio then refresh the metrics.
    ///
    /// Skipped until balances, a traded price and the ATH are all known.
    pub fn on_price(&mut self, price: f64) {
        if !self.has_balance() || self.traded_price == 0.0 || self.ath.is_none() {
            self.last_price = Some(price);
            return;
        }
        self.portfolio_ratio = self.drift_ratio(price, self.portfolio_ratio);
        self.calculate_profit(price);
    }

    /// Price distance a round trip on a 1000-unit notional needs to cover fees.
    pub fn minimum_profitable_range(&self, price: f64) -> f64 {
        if price <= 0.0 {
            return 0.0;
        }
        let qty = NOTIONAL_UNIT / price;
        let cost_per_pip = qty * (price + 1.0) - NOTIONAL_UNIT;
        safe_div(NOTIONAL_UNIT * self.fee * 2.0, cost_per_pip)
    }

    pub fn min_profitable_percent(&self, price: f64) -> f64 {
        safe_div(self.minimum_profitable_range(price), price) * 100.0
    }

    /// Raise a configured threshold to at least break-even.
    pub fn floor_threshold(&self, percent: f64, price: f64) -> f64 {
        percent.max(self.min_profitable_percent(price))
    }

    /// Fresh start from live balances: adopt the observed ratio.
    pub fn init_new_states(&mut self, price: f64) {
        let current = self.volatile_qty * price;
        let total = current + self.stable_qty;
        self.portfolio_ratio = self.clamp_ratio(safe_div(current, total));
        self.traded_price = price;
        self.buy_price_mean = 0.0;
        self.last_price = Some(price);

        info!(
            traded_price = self.traded_price,
            portfolio_ratio = self.portfolio_ratio,
            "🆕 [STATE] Initialized new portfolio state"
        );
    }

    /// Restore persisted fields, clamping the ratio into bounds.
    pub fn restore(&mut self, traded_price: f64, buy_price_mean: f64, portfolio_ratio: f64) {
        self.traded_price = traded_price;
        self.buy_price_mean = buy_price_mean;
        self.portfolio_ratio = self.clamp_ratio(portfolio_ratio);
    }

    /// Update the cost basis from a confirmed fill.
    ///
    /// Uses the volatile balance held before the fill is applied.
    pub fn apply_fill(&mut self, side: OrderSide, avg_price: f64, base_qty: f64) {
        let held = self.volatile_qty;
        match side {
            OrderSide::Buy => {
                self.buy_price_mean = if self.buy_price_mean == 0.0 {
                    avg_price
                } else {
                    safe_div(
                        held * self.buy_price_mean + base_qty * avg_price,
                        held + base_qty,
                    )
                };
            }
            OrderSide::Sell => {
                let remaining = held - base_qty;
                self.buy_price_mean = if remaining > 0.0 {
                    (held * self.buy_price_mean - base_qty * avg_price) / remaining
                } else {
                    0.0
                };
            }
        }
        self.traded_price = avg_price;
    }

    /// Clear the cost basis when the remaining position is dust.
    pub fn reset_if_dust(&mut self, price: f64, dust_value: f64) -> bool {
        if self.volatile_qty * price >= dust_value {
            return false;
        }
        self.traded_price = price;
        self.buy_price_mean = 0.0;
        true
    }

    pub fn trade_profit(&self) -> f64 {
        self.trade_profit
    }

    pub fn percent_diff(&self) -> f64 {
        self.percent_diff
    }

    pub fn price_diff(&self) -> f64 {
        self.price_diff
    }

    pub fn state(&self) -> PortfolioState {
        let price = self.last_price.unwrap_or(self.traded_price);
        PortfolioState {
            volatile_qty: self.volatile_qty,
            stable_qty: self.stable_qty,
            pair_balance: self.volatile_qty * price + self.stable_qty,
            traded_price: self.traded_price,
            buy_price_mean: self.buy_price_mean,
            portfolio_ratio: self.portfolio_ratio,
            real_ratio: self.real_ratio,
            ath: self.ath,
            working_range: self.working_range,
            percent_diff: self.percent_diff,
            trade_profit: self.trade_profit,
            price_diff: self.price_diff,
        }
    }
}
