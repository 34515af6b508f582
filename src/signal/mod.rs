//! Market signal processing: price history, impulse and trend lines.

pub mod history;
pub mod trend;

pub use history::{ImpulseStats, PriceHistory, PRICE_CAPACITY};
pub use trend::{CrossDetector, CrossDirection, TrendState, TrendTracker};
