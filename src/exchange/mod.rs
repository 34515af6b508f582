//! Exchange access for the trader.
//!
//! ## Gateway
//! [`ExchangeGateway`] is the only way the trader talks to a venue:
//! - Historical candles and instrument limits
//! - Wallet balances and market orders
//! - Ticker and private (wallet / fill) streams
//!
//! ## Paper trading
//! [`PaperExchange`] implements the gateway in memory and is fed from
//! candle CSV files loaded by [`replay`].

pub mod paper;
pub mod replay;
mod traits;
mod types;

pub use paper::{PaperExchange, ScriptedReply};
pub use traits::{with_timeout, ExchangeGateway, GatewayError};
#[cfg(test)]
pub use traits::MockExchangeGateway;
pub use types::*;
