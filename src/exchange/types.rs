//! Venue-neutral types exchanged between the trader and an exchange gateway.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Return code the exchange uses for "insufficient balance" on order submission.
pub const INSUFFICIENT_BALANCE_CODE: i64 = 170131;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// One OHLC candle, oldest first when returned in a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    /// Candle open time in epoch milliseconds
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Trading limits for a spot instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentConstraints {
    /// Smallest sellable base quantity
    pub min_order_qty: Decimal,
    /// Smallest buy notional in quote units
    pub min_order_notional: Decimal,
    /// Base quantity increment
    pub qty_step: Decimal,
    /// Quote amount increment for market buys
    #[serde(default = "default_quote_step")]
    pub quote_step: Decimal,
}

fn default_quote_step() -> Decimal {
    Decimal::new(1, 2)
}

impl InstrumentConstraints {
    /// Rounding step for an order quantity on `side`.
    pub fn step_for(&self, side: OrderSide) -> Decimal {
        match side {
            OrderSide::Buy => self.quote_step,
            OrderSide::Sell => self.qty_step,
        }
    }

    /// Smallest accepted order quantity on `side`, in the same units as the order.
    pub fn minimum_for(&self, side: OrderSide) -> Decimal {
        match side {
            OrderSide::Buy => self.min_order_notional,
            OrderSide::Sell => self.min_order_qty,
        }
    }
}

/// Free and total holdings of one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub total: Decimal,
}

/// Find an asset's balance in a wallet listing, zero when absent.
pub fn find_balance(balances: &[AssetBalance], asset: &str) -> AssetBalance {
    balances
        .iter()
        .find(|b| b.asset.eq_ignore_ascii_case(asset))
        .cloned()
        .unwrap_or_else(|| AssetBalance {
            asset: asset.to_string(),
            free: Decimal::ZERO,
            total: Decimal::ZERO,
        })
}

/// Market order request.
///
/// Buy quantities are denominated in the quote (stable) asset, sell
/// quantities in the base (volatile) asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
}

/// Exchange acknowledgement of an order submission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    #[serde(rename = "retCode")]
    pub return_code: i64,
    #[serde(rename = "retMsg", default)]
    pub message: String,
}

impl OrderAck {
    pub fn ok() -> Self {
        Self {
            return_code: 0,
            message: "OK".to_string(),
        }
    }

    pub fn rejected(return_code: i64, message: impl Into<String>) -> Self {
        Self {
            return_code,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.return_code == 0
    }

    pub fn is_insufficient_balance(&self) -> bool {
        self.return_code == INSUFFICIENT_BALANCE_CODE
    }
}

/// Terminal status of an order as reported on the private stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillStatus {
    New,
    PartiallyFilled,
    Filled,
    PartiallyFilledCanceled,
    Cancelled,
    Rejected,
}

impl FillStatus {
    /// Whether the order executed (fully, or partially before cancellation).
    pub fn is_filled(self) -> bool {
        matches!(self, FillStatus::Filled | FillStatus::PartiallyFilledCanceled)
    }
}

/// Order execution report from the private stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFill {
    pub symbol: String,
    pub side: OrderSide,
    /// Average execution price; venues occasionally report it empty
    pub avg_price: Option<Decimal>,
    /// Executed base quantity
    pub base_qty: Decimal,
    pub status: FillStatus,
    pub fee: Decimal,
    pub fee_asset: String,
}

impl OrderFill {
    /// Usable execution price, `None` for malformed reports.
    pub fn price(&self) -> Option<Decimal> {
        self.avg_price.filter(|p| *p > Decimal::ZERO)
    }

    /// Fee converted to quote units.
    pub fn fee_in_quote(&self, quote_asset: &str) -> Decimal {
        if self.fee_asset.eq_ignore_ascii_case(quote_asset) {
            self.fee
        } else {
            self.fee * self.price().unwrap_or(Decimal::ZERO)
        }
    }
}

/// Event delivered by a gateway subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeEvent {
    /// Last traded price plus the end marker of the candle it belongs to
    Ticker { price: Decimal, period_end: i64 },
    Wallet { balances: Vec<AssetBalance> },
    OrderFill(OrderFill),
    /// Anything the trader does not understand
    Unknown { topic: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fill(avg_price: Option<Decimal>) -> OrderFill {
        OrderFill {
            symbol: "BTCUSDC".to_string(),
            side: OrderSide::Buy,
            avg_price,
            base_qty: dec!(0.01),
            status: FillStatus::Filled,
            fee: dec!(0.00001),
            fee_asset: "BTC".to_string(),
        }
    }

    #[test]
    fn test_fill_price_rejects_missing_or_zero() {
        assert_eq!(fill(Some(dec!(50000))).price(), Some(dec!(50000)));
        assert_eq!(fill(Some(Decimal::ZERO)).price(), None);
        assert_eq!(fill(None).price(), None);
    }

    #[test]
    fn test_fee_in_quote() {
        let f = fill(Some(dec!(50000)));
        assert_eq!(f.fee_in_quote("USDC"), dec!(0.5));

        let mut sell = f.clone();
        sell.fee_asset = "USDC".to_string();
        sell.fee = dec!(0.3);
        assert_eq!(sell.fee_in_quote("USDC"), dec!(0.3));
    }

    #[test]
    fn test_fill_status() {
        assert!(FillStatus::Filled.is_filled());
        assert!(FillStatus::PartiallyFilledCanceled.is_filled());
        assert!(!FillStatus::Cancelled.is_filled());
        assert!(!FillStatus::New.is_filled());
    }

    #[test]
    fn test_order_ack_decodes_venue_fields() {
        let ack: OrderAck =
            serde_json::from_str(r#"{"retCode":170131,"retMsg":"Insufficient balance."}"#)
                .unwrap();
        assert!(ack.is_insufficient_balance());
        assert!(!ack.is_success());
    }

    #[test]
    fn test_constraints_step_per_side() {
        let c: InstrumentConstraints = serde_json::from_str(
            r#"{"minOrderQty":"0.000048","minOrderNotional":"1","qtyStep":"0.000001"}"#,
        )
        .unwrap();
        assert_eq!(c.step_for(OrderSide::Buy), dec!(0.01));
        assert_eq!(c.step_for(OrderSide::Sell), dec!(0.000001));
    }

    #[test]
    fn test_find_balance_defaults_to_zero() {
        let balances = vec![AssetBalance {
            asset: "USDC".to_string(),
            free: dec!(100),
            total: dec!(120),
        }];
        assert_eq!(find_balance(&balances, "usdc").free, dec!(100));
        assert_eq!(find_balance(&balances, "BTC").total, Decimal::ZERO);
    }
}
