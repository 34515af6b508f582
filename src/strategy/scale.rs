//! Counter-based scaling of rebalance thresholds.
//!
//! Each confirmed buy widens the next buy threshold and narrows the sell
//! threshold (and vice versa), so repeated trades in one direction need
//! progressively larger deviations.

use crate::config::{ScaleMode, ScalingConfig};
use serde::Serialize;

const FIBONACCI: [u32; 16] = [
    1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144, 233, 377, 610, 987, 1597,
];

/// Complementary buy/sell counters.
#[derive(Debug, Clone)]
pub struct OrderScale {
    enabled: bool,
    mode: ScaleMode,
    length: u32,
    buy_counter: u32,
    sell_counter: u32,
    min_buy_percent: f64,
    min_sell_percent: f64,
}

/// Serializable view for status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderScaleState {
    pub enabled: bool,
    pub buy_counter: u32,
    pub sell_counter: u32,
    pub buy_percent: f64,
    pub sell_percent: f64,
}

impl OrderScale {
    pub fn new(config: &ScalingConfig, min_buy_percent: f64, min_sell_percent: f64) -> Self {
        let cap = match config.mode {
            ScaleMode::Fibonacci => FIBONACCI.len() as u32,
            ScaleMode::Linear => u32::MAX,
        };
        Self {
            enabled: config.enabled,
            mode: config.mode,
            length: config.length.clamp(1, cap),
            buy_counter: 1,
            sell_counter: 1,
            min_buy_percent,
            min_sell_percent,
        }
    }

    fn factor(&self, counter: u32) -> f64 {
        let idx = counter.clamp(1, self.length);
        match self.mode {
            ScaleMode::Fibonacci => FIBONACCI[(idx - 1) as usize] as f64,
            ScaleMode::Linear => idx as f64,
        }
    }

    pub fn get_buy_percent(&self) -> f64 {
        if self.enabled {
            self.min_buy_percent * self.factor(self.buy_counter)
        } else {
            self.min_buy_percent
        }
    }

    pub fn get_sell_percent(&self) -> f64 {
        if self.enabled {
            self.min_sell_percent * self.factor(self.sell_counter)
        } else {
            self.min_sell_percent
        }
    }

    pub fn increment_buy(&mut self) {
        self.buy_counter = (self.buy_counter + 1).min(self.length);
        self.sell_counter = self.sell_counter.saturating_sub(1).max(1);
    }

    pub fn increment_sell(&mut self) {
        self.sell_counter = (self.sell_counter + 1).min(self.length);
        self.buy_counter = self.buy_counter.saturating_sub(1).max(1);
    }

    pub fn reset(&mut self) {
        self.buy_counter = 1;
        self.sell_counter = 1;
    }

    pub fn counters(&self) -> (u32, u32) {
        (self.buy_counter, self.sell_counter)
    }

    /// Restore persisted counters, clamped into range.
    pub fn restore(&mut self, buy_counter: u32, sell_counter: u32) {
        self.buy_counter = buy_counter.clamp(1, self.length);
        self.sell_counter = sell_counter.clamp(1, self.length);
    }

    pub fn state(&self) -> OrderScaleState {
        OrderScaleState {
            enabled: self.enabled,
            buy_counter: self.buy_counter,
            sell_counter: self.sell_counter,
            buy_percent: self.get_buy_percent(),
            sell_percent: self.get_sell_percent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale(enabled: bool, mode: ScaleMode) -> OrderScale {
        OrderScale::new(
            &ScalingConfig {
                enabled,
                mode,
                length: 8,
            },
            1.5,
            3.0,
        )
    }

    #[test]
    fn test_disabled_returns_minimums() {
        let mut s = scale(false, ScaleMode::Fibonacci);
        s.increment_buy();
        s.increment_buy();
        assert_eq!(s.get_buy_percent(), 1.5);
        assert_eq!(s.get_sell_percent(), 3.0);
    }

    #[test]
    fn test_fibonacci_factors() {
        let mut s = scale(true, ScaleMode::Fibonacci);
        assert_eq!(s.get_buy_percent(), 1.5);
        s.increment_buy();
        assert_eq!(s.get_buy_percent(), 3.0);
        s.increment_buy();
        assert_eq!(s.get_buy_percent(), 4.5);
        s.increment_buy();
        assert_eq!(s.get_buy_percent(), 7.5);
    }

    #[test]
    fn test_linear_factors() {
        let mut s = scale(true, ScaleMode::Linear);
        s.increment_sell();
        s.increment_sell();
        assert_eq!(s.get_sell_percent(), 9.0);
    }

    #[test]
    fn test_counters_are_complementary_and_bounded() {
        let mut s = scale(true, ScaleMode::Fibonacci);
        for _ in 0..3 {
            s.increment_buy();
        }
        assert_eq!(s.counters(), (4, 1));

        s.increment_sell();
        assert_eq!(s.counters(), (3, 2));

        for _ in 0..20 {
            s.increment_buy();
        }
        assert_eq!(s.counters(), (8, 1));
        // Capped at the eighth Fibonacci number
        assert_eq!(s.get_buy_percent(), 1.5 * 34.0);

        s.reset();
        assert_eq!(s.counters(), (1, 1));
    }

    #[test]
    fn test_restore_clamps() {
        let mut s = scale(true, ScaleMode::Fibonacci);
        s.restore(0, 99);
        assert_eq!(s.counters(), (1, 8));
    }
}
