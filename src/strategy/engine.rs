//! Rebalance decision state machine.
//!
//! Runs on every evaluation tick. Cross edges of the fast line over the
//! slow line open a buy window, edges under it open a sell window; a
//! window only turns into an order when the trend, deviation, direction
//! and local-range guards all pass.

use super::state::TraderState;
use crate::config::StrategyConfig;
use crate::exchange::OrderSide;
use crate::utils::{from_f64_lossy, round_down_to_lot};
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingFirstPrice,
    WarmingUp { until: Instant },
    Active,
}

/// Why an evaluation produced no order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    /// Warming up, or trend lines not initialized
    NotReady,
    NoSignal,
    TrendAgainst,
    BelowThreshold,
    /// Deviation points the other way
    WrongSide,
    InsideLocalRange,
    BelowMinimum,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Hold(HoldReason),
    /// Spend `quote` stable units
    Buy { quote: Decimal },
    /// Sell `base` volatile units
    Sell { base: Decimal },
}

impl Decision {
    /// Order side and quantity, if this is an order.
    pub fn order(&self) -> Option<(OrderSide, Decimal)> {
        match self {
            Decision::Buy { quote } => Some((OrderSide::Buy, *quote)),
            Decision::Sell { base } => Some((OrderSide::Sell, *base)),
            Decision::Hold(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    /// State should be persisted now
    pub checkpoint: bool,
}

impl Evaluation {
    fn hold(reason: HoldReason, checkpoint: bool) -> Self {
        Self {
            decision: Decision::Hold(reason),
            checkpoint,
        }
    }
}

pub struct RebalanceEngine {
    config: StrategyConfig,
    phase: Phase,
    checkpoint_price: Option<f64>,
}

impl RebalanceEngine {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            phase: Phase::AwaitingFirstPrice,
            checkpoint_price: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The first live price arrived; evaluations start after `warmup`.
    pub fn on_first_price(&mut self, now: Instant, warmup: Duration) {
        if self.phase == Phase::AwaitingFirstPrice {
            self.phase = Phase::WarmingUp {
                until: now + warmup,
            };
        }
    }

    pub fn evaluate(&mut self, state: &mut TraderState, now: Instant) -> Evaluation {
        match self.phase {
            Phase::AwaitingFirstPrice => return Evaluation::hold(HoldReason::NotReady, false),
            Phase::WarmingUp { until } if now < until => {
                return Evaluation::hold(HoldReason::NotReady, false)
            }
            Phase::WarmingUp { .. } => {
                info!("🟢 [ENGINE] Warm-up complete, evaluating");
                self.phase = Phase::Active;
            }
            Phase::Active => {}
        }

        let Some(price) = state.last_price() else {
            return Evaluation::hold(HoldReason::NotReady, false);
        };
        let Some(trend) = state.trend.trend() else {
            return Evaluation::hold(HoldReason::NotReady, false);
        };
        if !state.trend.is_ready() {
            return Evaluation::hold(HoldReason::NotReady, false);
        }

        let mut checkpoint = match self.checkpoint_price {
            Some(last) => (price - last).abs() > self.config.checkpoint_price_move,
            None => false,
        };
        if checkpoint || self.checkpoint_price.is_none() {
            self.checkpoint_price = Some(price);
        }

        // Latches track the lines only if both detectors run every evaluation
        let crossover = state.trend.detect_crossover();
        let crossunder = state.trend.detect_crossunder();

        let decision = if crossover {
            checkpoint = true;
            info!(price, trend, "📈 [SIGNAL] Crossover");
            self.buy_decision(state, price, trend)
        } else if crossunder {
            checkpoint = true;
            info!(price, trend, "📉 [SIGNAL] Crossunder");
            self.sell_decision(state, price, trend)
        } else {
            Decision::Hold(HoldReason::NoSignal)
        };

        if let Decision::Hold(reason) = &decision {
            if crossover || crossunder {
                debug!(?reason, price, "Signal skipped");
            }
        }

        Evaluation {
            decision,
            checkpoint,
        }
    }

    fn buy_decision(&self, state: &TraderState, price: f64, trend: f64) -> Decision {
        if trend < self.config.buy_trend_floor {
            return Decision::Hold(HoldReason::TrendAgainst);
        }
        let portfolio = &state.portfolio;
        let threshold = portfolio.floor_threshold(state.scale.get_buy_percent(), price);
        if portfolio.percent_diff().abs() < threshold {
            return Decision::Hold(HoldReason::BelowThreshold);
        }
        if portfolio.trade_profit() >= 0.0 {
            return Decision::Hold(HoldReason::WrongSide);
        }
        if portfolio.price_diff().abs() <= state.history.local_range() {
            return Decision::Hold(HoldReason::InsideLocalRange);
        }

        let (_, stable) = portfolio.balances();
        let amount = portfolio.trade_profit().abs().min(stable);
        let quote = round_down_to_lot(from_f64_lossy(amount), state.constraints.quote_step);
        if quote < state.constraints.min_order_notional {
            return Decision::Hold(HoldReason::BelowMinimum);
        }
        Decision::Buy { quote }
    }

    fn sell_decision(&self, state: &TraderState, price: f64, trend: f64) -> Decision {
        if trend > self.config.sell_trend_ceiling {
            return Decision::Hold(HoldReason::TrendAgainst);
        }
        let portfolio = &state.portfolio;
        let threshold = portfolio.floor_threshold(state.scale.get_sell_percent(), price);
        if portfolio.percent_diff().abs() < threshold {
            return Decision::Hold(HoldReason::BelowThreshold);
        }
        if portfolio.trade_profit() <= 0.0 {
            return Decision::Hold(HoldReason::WrongSide);
        }
        if portfolio.price_diff().abs() <= state.history.local_range() {
            return Decision::Hold(HoldReason::InsideLocalRange);
        }

        let amount = portfolio.trade_profit() / price;
        let base = round_down_to_lot(from_f64_lossy(amount), state.constraints.qty_step);
        if base < state.constraints.min_order_qty {
            return Decision::Hold(HoldReason::BelowMinimum);
        }
        Decision::Sell { base }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exchange::AssetBalance;
    use crate::utils::to_f64_lossy;
    use rust_decimal_macros::dec;

    fn config() -> Config {
        let mut config = Config::default();
        config.strategy.ma_length = 4;
        config
    }

    fn wallet(btc: Decimal, usdc: Decimal) -> Vec<AssetBalance> {
        vec![
            AssetBalance {
                asset: "BTC".to_string(),
                free: btc,
                total: btc,
            },
            AssetBalance {
                asset: "USDC".to_string(),
                free: usdc,
                total: usdc,
            },
        ]
    }

    /// State with a known basis, fed one tick per candle.
    fn state_with(
        config: &Config,
        btc: Decimal,
        usdc: Decimal,
        traded_price: f64,
        ticks: &[f64],
    ) -> TraderState {
        let mut state = TraderState::new(config);
        state.on_wallet(&wallet(btc, usdc));
        state.portfolio.update_ath(100_000.0);
        state.portfolio.restore(traded_price, 0.0, 0.5);
        for (i, price) in ticks.iter().enumerate() {
            state.on_ticker(*price, (i as i64 + 1) * 60_000);
        }
        state
    }

    fn active_engine(config: &Config) -> (RebalanceEngine, Instant) {
        let mut engine = RebalanceEngine::new(config.strategy.clone());
        let now = Instant::now();
        engine.on_first_price(now, Duration::ZERO);
        (engine, now)
    }

    #[test]
    fn test_holds_until_warm() {
        let config = config();
        let mut state = state_with(&config, dec!(0), dec!(10000), 90_000.0, &[100_000.0; 4]);
        let mut engine = RebalanceEngine::new(config.strategy.clone());
        let now = Instant::now();

        assert_eq!(
            engine.evaluate(&mut state, now).decision,
            Decision::Hold(HoldReason::NotReady)
        );

        engine.on_first_price(now, Duration::from_secs(7));
        assert_eq!(
            engine.evaluate(&mut state, now + Duration::from_secs(1)).decision,
            Decision::Hold(HoldReason::NotReady)
        );
        assert!(matches!(engine.phase(), Phase::WarmingUp { .. }));

        let eval = engine.evaluate(&mut state, now + Duration::from_secs(7));
        assert_eq!(engine.phase(), Phase::Active);
        assert!(eval.decision.order().is_some());
    }

    #[test]
    fn test_crossover_buys_deficit_once() {
        let config = config();
        let mut state = state_with(&config, dec!(0), dec!(10000), 90_000.0, &[100_000.0; 4]);
        let (mut engine, now) = active_engine(&config);

        // Target 5000 of 10000 in BTC, holding none
        let eval = engine.evaluate(&mut state, now);
        assert_eq!(eval.decision, Decision::Buy { quote: dec!(5000) });
        assert!(eval.checkpoint);

        // Latched: no second order on the same edge
        let eval = engine.evaluate(&mut state, now);
        assert_eq!(eval.decision, Decision::Hold(HoldReason::NoSignal));
        assert!(!eval.checkpoint);
    }

    #[test]
    fn test_crossunder_sells_excess() {
        let config = config();
        let mut state = state_with(
            &config,
            dec!(1),
            dec!(0),
            50_000.0,
            &[100_000.0, 100_000.0, 100_000.0, 100_000.0, 80_000.0],
        );
        let (mut engine, now) = active_engine(&config);

        match engine.evaluate(&mut state, now).decision {
            Decision::Sell { base } => {
                let base = to_f64_lossy(base);
                assert!(base > 0.09 && base < 0.11, "base {}", base);
            }
            other => panic!("expected sell, got {:?}", other),
        }
    }

    #[test]
    fn test_rising_trend_blocks_sell() {
        let mut config = config();
        config.strategy.sell_trend_ceiling = -10_000.0;
        let mut state = state_with(
            &config,
            dec!(1),
            dec!(0),
            50_000.0,
            &[100_000.0, 100_000.0, 100_000.0, 100_000.0, 80_000.0],
        );
        let (mut engine, now) = active_engine(&config);

        assert_eq!(
            engine.evaluate(&mut state, now).decision,
            Decision::Hold(HoldReason::TrendAgainst)
        );
    }

    #[test]
    fn test_falling_trend_blocks_buy() {
        let mut config = config();
        config.strategy.buy_trend_floor = 1.0;
        let mut state = state_with(&config, dec!(0), dec!(10000), 90_000.0, &[100_000.0; 4]);
        let (mut engine, now) = active_engine(&config);

        assert_eq!(
            engine.evaluate(&mut state, now).decision,
            Decision::Hold(HoldReason::TrendAgainst)
        );
    }

    #[test]
    fn test_small_deviation_is_below_threshold() {
        let config = config();
        // 0.05 BTC at 100000 = 5000 of 10000: already on target
        let mut state = state_with(&config, dec!(0.05), dec!(5000), 90_000.0, &[100_000.0; 4]);
        let (mut engine, now) = active_engine(&config);

        assert_eq!(
            engine.evaluate(&mut state, now).decision,
            Decision::Hold(HoldReason::BelowThreshold)
        );
    }

    #[test]
    fn test_overweight_on_crossover_is_wrong_side() {
        let config = config();
        let mut state = state_with(&config, dec!(0.1), dec!(0), 90_000.0, &[100_000.0; 4]);
        let (mut engine, now) = active_engine(&config);

        assert_eq!(
            engine.evaluate(&mut state, now).decision,
            Decision::Hold(HoldReason::WrongSide)
        );
    }

    #[test]
    fn test_move_inside_local_range_holds() {
        let config = config();
        // Amplitude 99000..101000, traded price 1000 away
        let mut state = state_with(
            &config,
            dec!(0),
            dec!(10000),
            100_000.0,
            &[99_000.0, 101_000.0, 101_000.0, 101_000.0],
        );
        let (mut engine, now) = active_engine(&config);

        assert_eq!(
            engine.evaluate(&mut state, now).decision,
            Decision::Hold(HoldReason::InsideLocalRange)
        );
    }

    #[test]
    fn test_dust_order_is_below_minimum() {
        let config = config();
        let mut state = state_with(&config, dec!(0), dec!(0.5), 90_000.0, &[100_000.0; 4]);
        let (mut engine, now) = active_engine(&config);

        assert_eq!(
            engine.evaluate(&mut state, now).decision,
            Decision::Hold(HoldReason::BelowMinimum)
        );
    }

    #[test]
    fn test_price_move_triggers_checkpoint() {
        let config = config();
        let mut state = state_with(&config, dec!(0.05), dec!(5000), 90_000.0, &[100_000.0; 4]);
        let (mut engine, now) = active_engine(&config);

        // First evaluation fires the crossover edge
        assert!(engine.evaluate(&mut state, now).checkpoint);
        state.on_ticker(100_020.0, 240_000);
        assert!(!engine.evaluate(&mut state, now).checkpoint);
        state.on_ticker(100_031.0, 240_000);
        assert!(engine.evaluate(&mut state, now).checkpoint);
        assert!(!engine.evaluate(&mut state, now).checkpoint);
    }
}
