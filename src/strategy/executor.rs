//! Market order submission with bounded retries.

use crate::config::{ExecutionConfig, PairConfig};
use crate::exchange::{
    find_balance, with_timeout, ExchangeGateway, GatewayError, InstrumentConstraints, MarketOrder,
    OrderSide,
};
use crate::utils::{from_f64_lossy, round_down_to_lot, to_f64_lossy};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{error, info, warn};

/// How an order submission ended. Submission never fails outright.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    /// Exchange accepted the order (the fill arrives on the private stream)
    Accepted { attempts: u32, quantity: Decimal },
    /// Business rejection other than insufficient balance
    Rejected {
        attempts: u32,
        code: i64,
        message: String,
    },
    /// Spendable balance fell under the floor while shrinking
    BalanceBelowFloor { attempts: u32 },
    /// Shrinking took the quantity under the exchange minimum
    BelowMinimum { attempts: u32, quantity: Decimal },
    /// Non-retryable transport failure (bad HTTP status)
    Aborted { attempts: u32, error: GatewayError },
    /// Attempt budget used up
    Exhausted { attempts: u32 },
}

impl OrderOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            OrderOutcome::Accepted { attempts, .. }
            | OrderOutcome::Rejected { attempts, .. }
            | OrderOutcome::BalanceBelowFloor { attempts }
            | OrderOutcome::BelowMinimum { attempts, .. }
            | OrderOutcome::Aborted { attempts, .. }
            | OrderOutcome::Exhausted { attempts } => *attempts,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, OrderOutcome::Accepted { .. })
    }
}

/// Submits rebalance orders, shrinking on insufficient balance.
pub struct OrderExecutor {
    config: ExecutionConfig,
    pair: PairConfig,
}

impl OrderExecutor {
    pub fn new(config: ExecutionConfig, pair: PairConfig) -> Self {
        Self { config, pair }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }

    /// Spendable balance in stable units for an order on `side`.
    async fn spendable(
        &self,
        gateway: &dyn ExchangeGateway,
        side: OrderSide,
        price: f64,
    ) -> Option<f64> {
        let balances = match with_timeout(self.timeout(), gateway.get_account_balances()).await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Balance refresh failed during order retry");
                return None;
            }
        };
        let value = match side {
            OrderSide::Buy => to_f64_lossy(find_balance(&balances, &self.pair.stable_asset).free),
            OrderSide::Sell => {
                to_f64_lossy(find_balance(&balances, &self.pair.base_asset).free) * price
            }
        };
        Some(value)
    }

    /// Submit a market order with up to `max_attempts` tries.
    ///
    /// - insufficient balance: wait, stop if the spendable balance is under
    ///   the floor, otherwise shrink the quantity and retry while it stays
    ///   at or above the side's minimum
    /// - any other return code or a bad HTTP status: stop
    /// - transport failure or timeout: wait and retry
    pub async fn submit(
        &self,
        gateway: &dyn ExchangeGateway,
        side: OrderSide,
        quantity: Decimal,
        constraints: &InstrumentConstraints,
        price: f64,
    ) -> OrderOutcome {
        let symbol = self.pair.symbol();
        let max_attempts = self.config.max_attempts;
        let step = constraints.step_for(side);
        let minimum = constraints.minimum_for(side);
        let mut quantity = round_down_to_lot(quantity, step);

        for attempt in 1..=max_attempts {
            let order = MarketOrder {
                symbol: symbol.clone(),
                side,
                quantity,
            };

            match with_timeout(self.timeout(), gateway.submit_market_order(&order)).await {
                Ok(ack) if ack.is_success() => {
                    info!(%symbol, %side, %quantity, attempt, "✅ [ORDER] Market order accepted");
                    return OrderOutcome::Accepted {
                        attempts: attempt,
                        quantity,
                    };
                }
                Ok(ack) if ack.is_insufficient_balance() => {
                    warn!(
                        %symbol,
                        %side,
                        %quantity,
                        attempt,
                        max_attempts,
                        "Insufficient balance, shrinking order"
                    );
                    tokio::time::sleep(Duration::from_millis(
                        self.config.insufficient_balance_delay_ms,
                    ))
                    .await;

                    if let Some(spendable) = self.spendable(gateway, side, price).await {
                        if spendable < self.config.balance_floor {
                            warn!(%symbol, spendable, floor = self.config.balance_floor, "Balance below floor, giving up");
                            return OrderOutcome::BalanceBelowFloor { attempts: attempt };
                        }
                    }

                    let shrunk = to_f64_lossy(quantity) * self.config.shrink_factor;
                    quantity = round_down_to_lot(from_f64_lossy(shrunk), step);
                    if quantity <= Decimal::ZERO || quantity < minimum {
                        warn!(%symbol, %side, %quantity, %minimum, "Shrunk order below exchange minimum, giving up");
                        return OrderOutcome::BelowMinimum {
                            attempts: attempt,
                            quantity,
                        };
                    }
                }
                Ok(ack) => {
                    error!(%symbol, %side, code = ack.return_code, message = %ack.message, "Order rejected");
                    return OrderOutcome::Rejected {
                        attempts: attempt,
                        code: ack.return_code,
                        message: ack.message,
                    };
                }
                Err(e) if e.is_transient() => {
                    warn!(%symbol, attempt, max_attempts, error = %e, "Order failed, retrying");
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(e) => {
                    error!(%symbol, %side, error = %e, "Order aborted");
                    return OrderOutcome::Aborted {
                        attempts: attempt,
                        error: e,
                    };
                }
            }
        }

        warn!(%symbol, %side, max_attempts, "Order attempts exhausted");
        OrderOutcome::Exhausted {
            attempts: max_attempts,
        }
    }
}
