//! Moving-average trend lines and edge-triggered cross detection.
//!
//! The slow line is an SMA shifted down by a fixed gap; the fast line is an
//! EMA of the same period. Both advance once per candle.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Divisor turning the MA length into the slow-line gap.
const GAP_DIVISOR: f64 = 4.8;

/// Simple moving average over the last `length` samples.
///
/// Yields the mean of whatever is buffered until the window fills.
#[derive(Debug, Clone)]
pub struct Sma {
    window: VecDeque<f64>,
    length: usize,
}

impl Sma {
    pub fn new(length: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(length),
            length: length.max(1),
        }
    }

    pub fn push(&mut self, price: f64) -> f64 {
        if self.window.len() == self.length {
            self.window.pop_front();
        }
        self.window.push_back(price);
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }
}

/// Exponential moving average, seeded by its first sample.
#[derive(Debug, Clone)]
pub struct Ema {
    k: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            k: 2.0 / (period as f64 + 1.0),
            value: None,
        }
    }

    pub fn push(&mut self, price: f64) -> f64 {
        let next = match self.value {
            Some(prev) => (price - prev) * self.k + prev,
            None => price,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossDirection {
    /// Fast line above slow line
    Over,
    /// Fast line below slow line
    Under,
}

/// Latching cross detector: reports `true` only on the evaluation where the
/// condition first becomes true, and re-arms once it becomes false.
#[derive(Debug, Clone)]
pub struct CrossDetector {
    direction: CrossDirection,
    latched: bool,
}

impl CrossDetector {
    pub fn new(direction: CrossDirection) -> Self {
        Self {
            direction,
            latched: false,
        }
    }

    pub fn check(&mut self, fast: f64, slow: f64) -> bool {
        let condition = match self.direction {
            CrossDirection::Over => fast > slow,
            CrossDirection::Under => fast < slow,
        };
        if !condition {
            self.latched = false;
            return false;
        }
        if self.latched {
            return false;
        }
        self.latched = true;
        true
    }

    pub fn latched(&self) -> bool {
        self.latched
    }

    pub fn set_latched(&mut self, latched: bool) {
        self.latched = latched;
    }
}

/// Snapshot of the trend lines and cross latches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendState {
    pub ma_trend: Option<f64>,
    pub ma_trend_prev: Option<f64>,
    pub ma_fast: Option<f64>,
    pub crossover_flag: bool,
    pub crossunder_flag: bool,
}

/// Slow/fast moving averages with cross detection.
#[derive(Debug, Clone)]
pub struct TrendTracker {
    sma: Sma,
    gap: f64,
    ema: Ema,
    ma_trend: Option<f64>,
    ma_trend_prev: Option<f64>,
    last_period: Option<i64>,
    crossover: CrossDetector,
    crossunder: CrossDetector,
}

impl TrendTracker {
    pub fn new(ma_length: usize) -> Self {
        Self {
            sma: Sma::new(ma_length),
            gap: ma_length as f64 / GAP_DIVISOR,
            ema: Ema::new(ma_length),
            ma_trend: None,
            ma_trend_prev: None,
            last_period: None,
            crossover: CrossDetector::new(CrossDirection::Over),
            crossunder: CrossDetector::new(CrossDirection::Under),
        }
    }

    /// Advance the slow line.
    pub fn update_slow(&mut self, price: f64) {
        let average = self.sma.push(price);
        self.ma_trend_prev = self.ma_trend;
        self.ma_trend = Some(average - self.gap);
    }

    /// Advance the fast line.
    pub fn update_fast(&mut self, price: f64) {
        self.ema.push(price);
    }

    /// Feed a ticker sample. Lines only move when `period_end` changes,
    /// giving one update per candle. Returns `true` on a new period.
    pub fn on_tick(&mut self, price: f64, period_end: i64) -> bool {
        if self.last_period == Some(period_end) {
            return false;
        }
        self.last_period = Some(period_end);
        self.update_slow(price);
        self.update_fast(price);
        true
    }

    /// Warm both lines from historical candle closes.
    pub fn seed(&mut self, closes: &[f64]) {
        for close in closes {
            self.update_slow(*close);
            self.update_fast(*close);
        }
    }

    pub fn ma_trend(&self) -> Option<f64> {
        self.ma_trend
    }

    pub fn ma_fast(&self) -> Option<f64> {
        self.ema.value()
    }

    /// Slow-line slope between its last two updates.
    pub fn trend(&self) -> Option<f64> {
        Some(self.ma_trend? - self.ma_trend_prev?)
    }

    /// Whether both lines are initialized.
    pub fn is_ready(&self) -> bool {
        self.ma_trend.is_some() && self.ema.value().is_some()
    }

    /// Edge-triggered fast-above-slow check. Call on every evaluation.
    pub fn detect_crossover(&mut self) -> bool {
        match (self.ema.value(), self.ma_trend) {
            (Some(fast), Some(slow)) => self.crossover.check(fast, slow),
            _ => false,
        }
    }

    /// Edge-triggered fast-below-slow check. Call on every evaluation.
    pub fn detect_crossunder(&mut self) -> bool {
        match (self.ema.value(), self.ma_trend) {
            (Some(fast), Some(slow)) => self.crossunder.check(fast, slow),
            _ => false,
        }
    }

    /// Restore persisted cross latches.
    pub fn restore_flags(&mut self, crossover: bool, crossunder: bool) {
        self.crossover.set_latched(crossover);
        self.crossunder.set_latched(crossunder && !crossover);
    }

    pub fn state(&self) -> TrendState {
        TrendState {
            ma_trend: self.ma_trend,
            ma_trend_prev: self.ma_trend_prev,
            ma_fast: self.ema.value(),
            crossover_flag: self.crossover.latched(),
            crossunder_flag: self.crossunder.latched(),
        }
    }
}
