//! # Volatility Harvester
//!
//! A rebalancing trader for one volatile/stable spot pair: it keeps a
//! target share of the volatile asset that drifts against price and
//! trades the deviation on moving-average crosses.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Gateway trait, paper exchange and candle replay
//! - `signal`: Price history, impulse statistics and trend lines
//! - `strategy`: Portfolio model, decision engine and order execution
//! - `session`: Session supervisor and background tasks
//! - `persistence`: JSON snapshot, binary price history and SQLite fill journal
//! - `alert`: Telegram trade alerts
//! - `utils`: Shared utilities and decimal arithmetic

pub mod alert;
pub mod config;
pub mod exchange;
pub mod persistence;
pub mod session;
pub mod signal;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use session::{Session, SessionCommand, SessionHandle};
