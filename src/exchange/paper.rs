//! In-memory paper exchange for dry runs and tests.
//!
//! Fills market orders at the last pushed price, charges a taker fee, and
//! reports wallet and fill events on the private stream the same way a
//! live venue would.

use super::traits::{ExchangeGateway, GatewayError};
use super::types::*;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

const CHANNEL_CAPACITY: usize = 1024;

/// Scripted reply to the next order submission, consumed before simulation.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Ack(OrderAck),
    Fail(GatewayError),
}

/// Mutable paper account.
#[derive(Debug, Default)]
pub struct PaperAccount {
    pub balances: HashMap<String, Decimal>,
    pub last_price: Decimal,
    pub order_count: u64,
    pub total_fees_quote: Decimal,
}

/// Paper trading gateway for one spot pair.
pub struct PaperExchange {
    symbol: String,
    base_asset: String,
    quote_asset: String,
    account: Arc<RwLock<PaperAccount>>,
    candles: Arc<RwLock<Vec<Candle>>>,
    constraints: InstrumentConstraints,
    /// Taker fee rate (0.1%)
    fee_rate: Decimal,
    scripted: Arc<RwLock<VecDeque<ScriptedReply>>>,
    ticker_subscribers: Arc<RwLock<Vec<mpsc::Sender<ExchangeEvent>>>>,
    private_subscribers: Arc<RwLock<Vec<mpsc::Sender<ExchangeEvent>>>>,
    submissions: AtomicU64,
}

impl PaperExchange {
    /// Create a paper exchange holding `base` and `quote` balances.
    pub fn new(base_asset: &str, quote_asset: &str, base: Decimal, quote: Decimal) -> Self {
        let mut account = PaperAccount::default();
        account.balances.insert(base_asset.to_string(), base);
        account.balances.insert(quote_asset.to_string(), quote);

        Self {
            symbol: format!("{}{}", base_asset, quote_asset),
            base_asset: base_asset.to_string(),
            quote_asset: quote_asset.to_string(),
            account: Arc::new(RwLock::new(account)),
            candles: Arc::new(RwLock::new(Vec::new())),
            constraints: InstrumentConstraints {
                min_order_qty: dec!(0.000048),
                min_order_notional: dec!(1),
                qty_step: dec!(0.000001),
                quote_step: dec!(0.01),
            },
            fee_rate: dec!(0.001),
            scripted: Arc::new(RwLock::new(VecDeque::new())),
            ticker_subscribers: Arc::new(RwLock::new(Vec::new())),
            private_subscribers: Arc::new(RwLock::new(Vec::new())),
            submissions: AtomicU64::new(0),
        }
    }

    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    pub fn with_constraints(mut self, constraints: InstrumentConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Replace the candles served by `get_historical_candles`.
    pub async fn set_candles(&self, candles: Vec<Candle>) {
        *self.candles.write().await = candles;
    }

    /// Queue replies for upcoming submissions, in order.
    pub async fn script_replies(&self, replies: impl IntoIterator<Item = ScriptedReply>) {
        self.scripted.write().await.extend(replies);
    }

    /// Number of `submit_market_order` calls seen so far.
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }

    pub async fn balance(&self, asset: &str) -> Decimal {
        self.account
            .read()
            .await
            .balances
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn total_fees(&self) -> Decimal {
        self.account.read().await.total_fees_quote
    }

    /// Publish a new last price to ticker subscribers.
    pub async fn push_price(&self, price: Decimal, period_end: i64) {
        self.account.write().await.last_price = price;
        broadcast(
            &self.ticker_subscribers,
            ExchangeEvent::Ticker { price, period_end },
        )
        .await;
    }

    async fn wallet_snapshot(&self) -> Vec<AssetBalance> {
        let account = self.account.read().await;
        let mut balances: Vec<AssetBalance> = account
            .balances
            .iter()
            .map(|(asset, amount)| AssetBalance {
                asset: asset.clone(),
                free: *amount,
                total: *amount,
            })
            .collect();
        balances.sort_by(|a, b| a.asset.cmp(&b.asset));
        balances
    }

    /// Execute a market order against the paper account.
    async fn simulate(&self, order: &MarketOrder) -> (OrderAck, Option<OrderFill>) {
        let mut account = self.account.write().await;
        let price = account.last_price;
        if price <= Decimal::ZERO {
            return (OrderAck::rejected(170130, "No market price"), None);
        }

        let base_held = account.balances.get(&self.base_asset).copied().unwrap_or_default();
        let quote_held = account.balances.get(&self.quote_asset).copied().unwrap_or_default();

        let fill = match order.side {
            OrderSide::Buy => {
                let spend = order.quantity;
                if spend > quote_held {
                    return (
                        OrderAck::rejected(INSUFFICIENT_BALANCE_CODE, "Insufficient balance."),
                        None,
                    );
                }
                let bought = (spend / price).round_dp(8);
                // Buy fees are charged in the base asset
                let fee = (bought * self.fee_rate).round_dp(10);
                account.balances.insert(self.quote_asset.clone(), quote_held - spend);
                account.balances.insert(self.base_asset.clone(), base_held + bought - fee);
                account.total_fees_quote += fee * price;
                OrderFill {
                    symbol: self.symbol.clone(),
                    side: OrderSide::Buy,
                    avg_price: Some(price),
                    base_qty: bought,
                    status: FillStatus::Filled,
                    fee,
                    fee_asset: self.base_asset.clone(),
                }
            }
            OrderSide::Sell => {
                let sold = order.quantity;
                if sold > base_held {
                    return (
                        OrderAck::rejected(INSUFFICIENT_BALANCE_CODE, "Insufficient balance."),
                        None,
                    );
                }
                let proceeds = sold * price;
                let fee = (proceeds * self.fee_rate).round_dp(8);
                account.balances.insert(self.base_asset.clone(), base_held - sold);
                account
                    .balances
                    .insert(self.quote_asset.clone(), quote_held + proceeds - fee);
                account.total_fees_quote += fee;
                OrderFill {
                    symbol: self.symbol.clone(),
                    side: OrderSide::Sell,
                    avg_price: Some(price),
                    base_qty: sold,
                    status: FillStatus::Filled,
                    fee,
                    fee_asset: self.quote_asset.clone(),
                }
            }
        };

        account.order_count += 1;
        info!(
            symbol = %self.symbol,
            side = %order.side,
            quantity = %order.quantity,
            price = %price,
            fee = %fill.fee,
            "Paper order executed"
        );
        (OrderAck::ok(), Some(fill))
    }
}

async fn broadcast(subscribers: &RwLock<Vec<mpsc::Sender<ExchangeEvent>>>, event: ExchangeEvent) {
    let mut subs = subscribers.write().await;
    subs.retain(|tx| !tx.is_closed());
    for tx in subs.iter() {
        if tx.send(event.clone()).await.is_err() {
            debug!("Paper subscriber dropped");
        }
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn get_historical_candles(
        &self,
        _symbol: &str,
        _interval_minutes: u32,
    ) -> Result<Vec<Candle>, GatewayError> {
        Ok(self.candles.read().await.clone())
    }

    async fn get_instrument_constraints(
        &self,
        _symbol: &str,
    ) -> Result<InstrumentConstraints, GatewayError> {
        Ok(self.constraints.clone())
    }

    async fn get_account_balances(&self) -> Result<Vec<AssetBalance>, GatewayError> {
        Ok(self.wallet_snapshot().await)
    }

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<OrderAck, GatewayError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);

        if let Some(reply) = self.scripted.write().await.pop_front() {
            return match reply {
                ScriptedReply::Ack(ack) => Ok(ack),
                ScriptedReply::Fail(err) => Err(err),
            };
        }

        let (ack, fill) = self.simulate(order).await;
        if let Some(fill) = fill {
            // Fill first: cost basis is computed against pre-trade holdings
            broadcast(&self.private_subscribers, ExchangeEvent::OrderFill(fill)).await;
            let balances = self.wallet_snapshot().await;
            broadcast(&self.private_subscribers, ExchangeEvent::Wallet { balances }).await;
        }
        Ok(ack)
    }

    async fn subscribe_ticker(
        &self,
        _symbol: &str,
    ) -> Result<mpsc::Receiver<ExchangeEvent>, GatewayError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.ticker_subscribers.write().await.push(tx);
        Ok(rx)
    }

    async fn subscribe_private(&self) -> Result<mpsc::Receiver<ExchangeEvent>, GatewayError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.private_subscribers.write().await.push(tx);
        Ok(rx)
    }
}
