//! Trading strategy implementation.
//!
//! Contains the core logic for:
//! - Target-ratio portfolio model and cost basis
//! - Threshold scaling after consecutive trades
//! - Rebalance decisions on trend-line crosses
//! - Market order submission with retries

mod engine;
mod executor;
mod portfolio;
mod scale;
mod state;

pub use engine::{Decision, Evaluation, HoldReason, Phase, RebalanceEngine};
pub use executor::{OrderExecutor, OrderOutcome};
pub use portfolio::{PortfolioModel, PortfolioState};
pub use scale::{OrderScale, OrderScaleState};
pub use state::{default_constraints, TraderState, TraderStatus};
