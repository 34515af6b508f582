//! Rolling price history with impulse statistics.
//!
//! Keeps one day of 1-second price samples, a short pool of nonzero price
//! deltas for momentum ("impulse") measurement, and a per-candle amplitude
//! window used as the local noise range.

use crate::utils::{harmonic_mean, safe_div};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::trace;

/// One day of 1-second samples.
pub const PRICE_CAPACITY: usize = 86_400;

/// Impulse needs at least this many deltas before anything is computed.
const MIN_DIFF_SAMPLES: usize = 4;
/// Minimum members on each side of the noise floor.
const MIN_PARTITION: usize = 2;

/// Momentum statistics over the delta pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImpulseStats {
    /// Noise floor: |delta| at rank len/10 of the descending magnitudes
    pub min_impulse: f64,
    /// Count of up moves minus count of down moves above the floor
    pub impulse: f64,
    pub impulse_percent: f64,
    pub impulse_harmonic: f64,
    pub impulse_harmonic_percent: f64,
}

/// Bounded ring of prices plus derived delta and amplitude windows.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    prices: VecDeque<f64>,
    price_capacity: usize,
    diffs: VecDeque<f64>,
    diff_capacity: usize,
    amplitude: VecDeque<f64>,
    amplitude_capacity: usize,
    stats: ImpulseStats,
}

fn push_bounded(buf: &mut VecDeque<f64>, capacity: usize, value: f64) {
    if capacity == 0 {
        return;
    }
    while buf.len() >= capacity {
        buf.pop_front();
    }
    buf.push_back(value);
}

impl PriceHistory {
    /// History sized from the impulse window (minutes of 1s deltas) and
    /// the amplitude window (seconds, sampled once per 1-minute candle).
    pub fn new(impulse_window_minutes: u32, amplitude_window_secs: u64) -> Self {
        Self::with_capacities(
            PRICE_CAPACITY,
            impulse_window_minutes as usize * 60,
            (amplitude_window_secs / 60) as usize,
        )
    }

    pub fn with_capacities(prices: usize, diffs: usize, amplitude: usize) -> Self {
        Self {
            prices: VecDeque::with_capacity(prices.min(PRICE_CAPACITY)),
            price_capacity: prices,
            diffs: VecDeque::with_capacity(diffs),
            diff_capacity: diffs,
            amplitude: VecDeque::with_capacity(amplitude),
            amplitude_capacity: amplitude,
            stats: ImpulseStats::default(),
        }
    }

    /// Record a price sample and its delta against the previous sample.
    pub fn append(&mut self, price: f64) {
        if let Some(last) = self.prices.back().copied() {
            let delta = price - last;
            if delta != 0.0 {
                push_bounded(&mut self.diffs, self.diff_capacity, delta);
            }
        }
        push_bounded(&mut self.prices, self.price_capacity, price);
    }

    /// Rebuild from a stored series, oldest first.
    pub fn reseed(&mut self, prices: &[f64]) {
        for price in prices {
            self.append(*price);
        }
    }

    pub fn last(&self) -> Option<f64> {
        self.prices.back().copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn prices(&self) -> Vec<f64> {
        self.prices.iter().copied().collect()
    }

    pub fn diff_count(&self) -> usize {
        self.diffs.len()
    }

    pub fn impulse(&self) -> &ImpulseStats {
        &self.stats
    }

    /// Recompute impulse statistics from the delta pool.
    ///
    /// Returns `true` when the statistics were updated. The noise floor is
    /// refreshed whenever there are enough deltas, even if the partitions
    /// end up too small to update the rest.
    pub fn recompute_impulse(&mut self) -> bool {
        if self.diffs.len() < MIN_DIFF_SAMPLES {
            return false;
        }

        let mut magnitudes: Vec<f64> = self.diffs.iter().map(|d| d.abs()).collect();
        magnitudes.sort_by(|a, b| b.total_cmp(a));
        let floor = magnitudes[magnitudes.len() / 10];
        self.stats.min_impulse = floor;

        let positive: Vec<f64> = self.diffs.iter().copied().filter(|d| *d > floor).collect();
        let negative: Vec<f64> = self
            .diffs
            .iter()
            .copied()
            .filter(|d| *d < -floor)
            .map(f64::abs)
            .collect();

        if positive.len() < MIN_PARTITION || negative.len() < MIN_PARTITION {
            trace!(
                floor,
                positive = positive.len(),
                negative = negative.len(),
                "Impulse partitions too small"
            );
            return false;
        }

        let pos = positive.len() as f64;
        let neg = negative.len() as f64;
        self.stats.impulse = pos - neg;
        self.stats.impulse_percent = safe_div(pos, pos + neg) * 100.0 - 50.0;

        let h_pos = harmonic_mean(&positive);
        let h_neg = harmonic_mean(&negative);
        self.stats.impulse_harmonic = h_pos - h_neg;
        self.stats.impulse_harmonic_percent = safe_div(h_pos, h_pos + h_neg) * 100.0 - 50.0;
        true
    }

    /// Record one amplitude sample (called once per completed candle).
    pub fn record_amplitude(&mut self, price: f64) {
        push_bounded(&mut self.amplitude, self.amplitude_capacity, price);
    }

    /// Max minus min of the amplitude window, 0.0 when empty.
    pub fn local_range(&self) -> f64 {
        let mut iter = self.amplitude.iter().copied();
        let Some(first) = iter.next() else {
            return 0.0;
        };
        let (lo, hi) = iter.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));
        hi - lo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_from(prices: &[f64]) -> PriceHistory {
        let mut history = PriceHistory::new(3, 7200);
        history.reseed(prices);
        history
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = PriceHistory::with_capacities(3, 10, 2);
        for p in [1.0, 2.0, 3.0, 4.0] {
            history.append(p);
        }
        assert_eq!(history.prices(), vec![2.0, 3.0, 4.0]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_default_capacities() {
        let history = PriceHistory::new(3, 7200);
        assert_eq!(history.price_capacity, 86_400);
        assert_eq!(history.diff_capacity, 180);
        assert_eq!(history.amplitude_capacity, 120);
    }

    #[test]
    fn test_zero_deltas_are_not_pooled() {
        let history = history_from(&[100.0, 100.0, 101.0, 101.0, 100.0]);
        assert_eq!(history.diff_count(), 2);
    }

    #[test]
    fn test_too_few_deltas_is_noop() {
        let mut history = history_from(&[100.0, 101.0, 102.0]);
        assert!(!history.recompute_impulse());
        assert_eq!(history.impulse(), &ImpulseStats::default());
    }

    #[test]
    fn test_noise_floor_single_spike_leaves_stats_untouched() {
        // Deltas: nine +1 moves then one +100 spike
        let mut prices = vec![1000.0];
        for i in 1..=9 {
            prices.push(1000.0 + i as f64);
        }
        prices.push(1109.0);
        let mut history = history_from(&prices);
        assert_eq!(history.diff_count(), 10);

        assert!(!history.recompute_impulse());
        assert_eq!(history.impulse().min_impulse, 1.0);
        assert_eq!(history.impulse().impulse, 0.0);
        assert_eq!(history.impulse().impulse_percent, 0.0);
    }

    #[test]
    fn test_impulse_statistics() {
        // 50 deltas: floor is the magnitude at rank 5, so only the five
        // large moves clear it (three up, two down)
        let mut deltas = vec![10.0, 8.0, 6.0, -9.0, -6.0];
        for i in 0..45 {
            deltas.push(if i % 2 == 0 { 1.0 } else { -1.0 });
        }
        let mut prices = vec![1000.0];
        for d in deltas {
            let next = prices[prices.len() - 1] + d;
            prices.push(next);
        }
        let mut history = history_from(&prices);
        assert_eq!(history.diff_count(), 50);
        assert!(history.recompute_impulse());

        let stats = history.impulse();
        assert_eq!(stats.min_impulse, 1.0);
        assert_eq!(stats.impulse, 1.0);
        assert!((stats.impulse_percent - 10.0).abs() < 1e-9);

        let h_pos = 3.0 / (1.0 / 10.0 + 1.0 / 8.0 + 1.0 / 6.0);
        let h_neg = 2.0 / (1.0 / 9.0 + 1.0 / 6.0);
        assert!((stats.impulse_harmonic - (h_pos - h_neg)).abs() < 1e-9);
        let expected_pct = h_pos / (h_pos + h_neg) * 100.0 - 50.0;
        assert!((stats.impulse_harmonic_percent - expected_pct).abs() < 1e-9);
    }

    #[test]
    fn test_local_range() {
        let mut history = PriceHistory::with_capacities(10, 10, 3);
        assert_eq!(history.local_range(), 0.0);
        for p in [100.0, 130.0, 90.0, 110.0] {
            history.record_amplitude(p);
        }
        // 100 evicted
        assert_eq!(history.local_range(), 40.0);
    }
}
