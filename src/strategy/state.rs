//! Shared analytics state of one trading session.
//!
//! Every task mutates this under a single lock, so each method here is a
//! complete read-modify-write with no I/O.

use super::portfolio::{PortfolioModel, PortfolioState};
use super::scale::{OrderScale, OrderScaleState};
use crate::config::{Config, PairConfig};
use crate::exchange::{find_balance, AssetBalance, Candle, InstrumentConstraints, OrderFill, OrderSide};
use crate::persistence::{FillRecord, PersistedSnapshot};
use crate::signal::{ImpulseStats, PriceHistory, TrendState, TrendTracker};
use crate::utils::to_f64_lossy;
use chrono::Utc;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Point-in-time view for the status command and logs.
#[derive(Debug, Clone, Serialize)]
pub struct TraderStatus {
    pub symbol: String,
    pub last_price: Option<f64>,
    pub history_len: usize,
    pub local_range: f64,
    pub impulse: ImpulseStats,
    pub trend: TrendState,
    pub scale: OrderScaleState,
    pub portfolio: PortfolioState,
}

pub struct TraderState {
    pair: PairConfig,
    pub history: PriceHistory,
    pub trend: TrendTracker,
    pub scale: OrderScale,
    pub portfolio: PortfolioModel,
    pub constraints: InstrumentConstraints,
    last_price: Option<f64>,
}

/// Limits used until the exchange reports real ones.
pub fn default_constraints() -> InstrumentConstraints {
    InstrumentConstraints {
        min_order_qty: dec!(0.000048),
        min_order_notional: dec!(1),
        qty_step: dec!(0.000001),
        quote_step: dec!(0.01),
    }
}

impl TraderState {
    pub fn new(config: &Config) -> Self {
        let strategy = &config.strategy;
        Self {
            pair: config.pair.clone(),
            history: PriceHistory::new(
                strategy.impulse_window_minutes,
                strategy.amplitude_window_secs,
            ),
            trend: TrendTracker::new(strategy.ma_length),
            scale: OrderScale::new(
                &config.scaling,
                strategy.buy_rebalance_percent,
                strategy.sell_rebalance_percent,
            ),
            portfolio: PortfolioModel::new(strategy),
            constraints: default_constraints(),
            last_price: None,
        }
    }

    pub fn symbol(&self) -> String {
        self.pair.symbol()
    }

    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }

    /// Warm the trend lines, amplitude window and ATH from candles.
    pub fn seed_from_candles(&mut self, candles: &[Candle]) {
        let closes: Vec<f64> = candles.iter().map(|c| to_f64_lossy(c.close)).collect();
        self.trend.seed(&closes);
        for close in &closes {
            self.history.record_amplitude(*close);
        }
        if let Some(high) = candles
            .iter()
            .map(|c| to_f64_lossy(c.high))
            .max_by(|a, b| a.total_cmp(b))
        {
            self.portfolio.update_ath(high);
        }
        info!(
            candles = candles.len(),
            ath = ?self.portfolio.ath(),
            "📊 [SEED] Trend lines seeded from candles"
        );
    }

    /// Apply one ticker sample.
    pub fn on_ticker(&mut self, price: f64, period_end: i64) {
        self.history.append(price);
        if self.trend.on_tick(price, period_end) {
            self.history.record_amplitude(price);
        }
        self.history.recompute_impulse();
        self.portfolio.on_price(price);
        self.last_price = Some(price);
    }

    /// Adopt a wallet listing. Only the pair's two assets matter.
    pub fn on_wallet(&mut self, balances: &[AssetBalance]) {
        let volatile = find_balance(balances, &self.pair.base_asset);
        let stable = find_balance(balances, &self.pair.stable_asset);
        self.portfolio
            .set_balances(to_f64_lossy(volatile.total), to_f64_lossy(stable.total));
    }

    /// Apply a fill report. Returns the journal entry when it counted.
    pub fn on_fill(&mut self, fill: &OrderFill) -> Option<FillRecord> {
        if !fill.status.is_filled() {
            debug!(status = ?fill.status, "Ignoring unfilled order report");
            return None;
        }
        let Some(price) = fill.price() else {
            warn!(symbol = %fill.symbol, "Dropping fill without a price");
            return None;
        };

        self.portfolio
            .apply_fill(fill.side, to_f64_lossy(price), to_f64_lossy(fill.base_qty));
        match fill.side {
            OrderSide::Buy => self.scale.increment_buy(),
            OrderSide::Sell => self.scale.increment_sell(),
        }

        Some(FillRecord {
            timestamp: Utc::now(),
            symbol: fill.symbol.clone(),
            side: fill.side,
            price,
            base_qty: fill.base_qty,
            quote_value: price * fill.base_qty,
            fee_stable: fill.fee_in_quote(&self.pair.stable_asset),
        })
    }

    /// First live price: make sure an ATH exists, then restore the
    /// persisted basis or start fresh from the current balances.
    pub fn start(&mut self, price: f64, snapshot: Option<&PersistedSnapshot>) {
        if self.portfolio.ath().is_none() {
            self.portfolio.update_ath(price);
        }
        match snapshot {
            Some(snapshot) => {
                self.restore(snapshot);
                info!(
                    traded_price = snapshot.traded_price,
                    portfolio_ratio = self.portfolio.portfolio_ratio,
                    "♻️  [STATE] Restored persisted state"
                );
            }
            None => {
                self.portfolio.init_new_states(price);
                self.trend.restore_flags(false, false);
            }
        }
    }

    pub fn restore(&mut self, snapshot: &PersistedSnapshot) {
        self.portfolio.restore(
            snapshot.traded_price,
            snapshot.buy_price_mean,
            snapshot.portfolio_ratio,
        );
        self.trend
            .restore_flags(snapshot.trend_crossover, snapshot.trend_crossunder);
        self.scale
            .restore(snapshot.buy_counter, snapshot.sell_counter);
    }

    pub fn snapshot(&self) -> PersistedSnapshot {
        let trend = self.trend.state();
        let (buy_counter, sell_counter) = self.scale.counters();
        PersistedSnapshot {
            traded_price: self.portfolio.traded_price,
            buy_price_mean: self.portfolio.buy_price_mean,
            portfolio_ratio: self.portfolio.portfolio_ratio,
            trend_crossover: trend.crossover_flag,
            trend_crossunder: trend.crossunder_flag,
            buy_counter,
            sell_counter,
        }
    }

    pub fn status(&self) -> TraderStatus {
        TraderStatus {
            symbol: self.symbol(),
            last_price: self.last_price,
            history_len: self.history.len(),
            local_range: self.history.local_range(),
            impulse: self.history.impulse().clone(),
            trend: self.trend.state(),
            scale: self.scale.state(),
            portfolio: self.portfolio.state(),
        }
    }
}
