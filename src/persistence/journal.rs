//! SQLite journal of confirmed fills.
//!
//! Feeds the periodic fee summary and the `status` command. Decimal
//! amounts are stored as TEXT to keep them exact.

use crate::exchange::OrderSide;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// One journaled fill.
#[derive(Debug, Clone, PartialEq)]
pub struct FillRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub base_qty: Decimal,
    pub quote_value: Decimal,
    pub fee_stable: Decimal,
}

/// Aggregate over all journaled fills.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeSummary {
    pub fills: u64,
    pub volume: Decimal,
    pub fees: Decimal,
}

pub struct FillJournal {
    conn: Connection,
}

impl FillJournal {
    /// Open the journal, creating the schema if needed.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open journal at {:?}", db_path.as_ref()))?;

        let journal = Self { conn };
        journal.init_schema()?;

        info!("Fill journal opened at {:?}", db_path.as_ref());
        Ok(journal)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS fills (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                base_qty TEXT NOT NULL,
                quote_value TEXT NOT NULL,
                fee_stable TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_fills_timestamp ON fills(timestamp);
            "#,
        )?;

        debug!("Journal schema initialized");
        Ok(())
    }

    pub fn record_fill(&self, fill: &FillRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO fills (timestamp, symbol, side, price, base_qty, quote_value, fee_stable)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                fill.timestamp.to_rfc3339(),
                fill.symbol,
                fill.side.to_string(),
                fill.price.to_string(),
                fill.base_qty.to_string(),
                fill.quote_value.to_string(),
                fill.fee_stable.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Most recent fills, newest first.
    pub fn recent_fills(&self, limit: usize) -> Result<Vec<FillRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, symbol, side, price, base_qty, quote_value, fee_stable
            FROM fills
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let fills: Vec<FillRecord> = stmt
            .query_map([limit], |row| {
                let ts: String = row.get(0)?;
                let side: String = row.get(2)?;
                Ok(FillRecord {
                    timestamp: DateTime::parse_from_rfc3339(&ts)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    symbol: row.get(1)?,
                    side: if side == "SELL" {
                        OrderSide::Sell
                    } else {
                        OrderSide::Buy
                    },
                    price: Decimal::from_str(&row.get::<_, String>(3)?).unwrap_or_default(),
                    base_qty: Decimal::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
                    quote_value: Decimal::from_str(&row.get::<_, String>(5)?)
                        .unwrap_or_default(),
                    fee_stable: Decimal::from_str(&row.get::<_, String>(6)?).unwrap_or_default(),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(fills)
    }

    /// Fill count, traded volume and fees paid, in stable units.
    pub fn fee_summary(&self) -> Result<FeeSummary> {
        let mut stmt = self
            .conn
            .prepare("SELECT quote_value, fee_stable FROM fills")?;

        let mut summary = FeeSummary::default();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (volume, fee) = row?;
            summary.fills += 1;
            summary.volume += Decimal::from_str(&volume).unwrap_or_default();
            summary.fees += Decimal::from_str(&fee).unwrap_or_default();
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(side: OrderSide, price: Decimal, qty: Decimal, fee: Decimal) -> FillRecord {
        FillRecord {
            timestamp: Utc::now(),
            symbol: "BTCUSDC".to_string(),
            side,
            price,
            base_qty: qty,
            quote_value: price * qty,
            fee_stable: fee,
        }
    }

    #[test]
    fn test_record_and_read_back() {
        let journal = FillJournal::open(":memory:").unwrap();
        journal
            .record_fill(&record(OrderSide::Buy, dec!(50000), dec!(0.02), dec!(1)))
            .unwrap();
        journal
            .record_fill(&record(OrderSide::Sell, dec!(55000), dec!(0.01), dec!(0.55)))
            .unwrap();

        let fills = journal.recent_fills(10).unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].side, OrderSide::Sell);
        assert_eq!(fills[0].price, dec!(55000));
        assert_eq!(fills[1].quote_value, dec!(1000.00));

        assert_eq!(journal.recent_fills(1).unwrap().len(), 1);
    }

    #[test]
    fn test_fee_summary() {
        let journal = FillJournal::open(":memory:").unwrap();
        assert_eq!(journal.fee_summary().unwrap(), FeeSummary::default());

        journal
            .record_fill(&record(OrderSide::Buy, dec!(50000), dec!(0.02), dec!(1)))
            .unwrap();
        journal
            .record_fill(&record(OrderSide::Sell, dec!(55000), dec!(0.01), dec!(0.55)))
            .unwrap();

        let summary = journal.fee_summary().unwrap();
        assert_eq!(summary.fills, 2);
        assert_eq!(summary.volume, dec!(1550));
        assert_eq!(summary.fees, dec!(1.55));
    }

    #[test]
    fn test_file_backed_journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.db");
        {
            let journal = FillJournal::open(&path).unwrap();
            journal
                .record_fill(&record(OrderSide::Buy, dec!(40000), dec!(0.01), dec!(0.4)))
                .unwrap();
        }
        let journal = FillJournal::open(&path).unwrap();
        assert_eq!(journal.fee_summary().unwrap().fills, 1);
    }
}
