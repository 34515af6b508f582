//! The gateway seam between the trader and a spot exchange.
//!
//! Wire formats, request signing and stream reconnects live behind this
//! trait. The trader only sees normalized types from [`super::types`].

use super::types::{AssetBalance, Candle, ExchangeEvent, InstrumentConstraints, MarketOrder, OrderAck};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failures reaching the exchange.
///
/// Business rejections are not errors: they come back as an [`OrderAck`]
/// with a nonzero return code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),
}

impl GatewayError {
    /// Transport hiccups worth retrying; a bad HTTP status is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transport(_) | GatewayError::Timeout(_))
    }
}

/// Spot exchange operations the trader depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Historical candles for `symbol`, oldest first.
    async fn get_historical_candles(
        &self,
        symbol: &str,
        interval_minutes: u32,
    ) -> Result<Vec<Candle>, GatewayError>;

    async fn get_instrument_constraints(
        &self,
        symbol: &str,
    ) -> Result<InstrumentConstraints, GatewayError>;

    async fn get_account_balances(&self) -> Result<Vec<AssetBalance>, GatewayError>;

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<OrderAck, GatewayError>;

    /// Public ticker stream. Emits [`ExchangeEvent::Ticker`].
    async fn subscribe_ticker(
        &self,
        symbol: &str,
    ) -> Result<mpsc::Receiver<ExchangeEvent>, GatewayError>;

    /// Private account stream. Emits wallet and order fill events.
    async fn subscribe_private(&self) -> Result<mpsc::Receiver<ExchangeEvent>, GatewayError>;
}

/// Bound a gateway call by `limit`, mapping expiry to [`GatewayError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, GatewayError>
where
    F: std::future::Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Transport("reset".into()).is_transient());
        assert!(GatewayError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(!GatewayError::HttpStatus(403).is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_maps_expiry() {
        let result: Result<(), GatewayError> = with_timeout(Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(GatewayError::Timeout(Duration::from_secs(5))));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout(Duration::from_secs(5), async { Ok::<_, GatewayError>(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
