//! Shared numeric helpers.

pub mod decimal;
pub mod stats;

pub use decimal::{from_f64_lossy, round_down_to_lot, to_f64_lossy};
pub use stats::{harmonic_mean, safe_div};
