//! Candle CSV loading for paper replays.
//!
//! Expected CSV format:
//! ```csv
//! timestamp,open,high,low,close
//! 2024-01-01T00:00:00Z,42000.5,42100,41950,42050.25
//! 1704067260000,42050.25,42080,42010,42030
//! ```
//! Timestamps are RFC 3339 or epoch milliseconds.

use super::paper::PaperExchange;
use super::types::Candle;
use anyhow::{Context, Result};
use chrono::DateTime;
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Candle length used for period-end markers.
pub const CANDLE_MILLIS: i64 = 60_000;

/// Load candles from a CSV file, sorted oldest first.
pub fn load_candles<P: AsRef<Path>>(path: P) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

    parse_candles(&content)
}

/// Parse candles from CSV content.
pub fn parse_candles(content: &str) -> Result<Vec<Candle>> {
    let mut candles = Vec::new();

    for (line_num, line) in content.lines().enumerate() {
        if line_num == 0 && line.starts_with("timestamp") {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        let candle = parse_row(line)
            .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
        candles.push(candle);
    }

    if candles.is_empty() {
        anyhow::bail!("CSV file contains no candle rows");
    }

    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

fn parse_row(line: &str) -> Result<Candle> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    anyhow::ensure!(fields.len() >= 5, "Expected 5 fields, got {}", fields.len());

    let open_time = match fields[0].parse::<i64>() {
        Ok(ms) => ms,
        Err(_) => DateTime::parse_from_rfc3339(fields[0])
            .context("Invalid timestamp")?
            .timestamp_millis(),
    };
    let price = |idx: usize, name: &str| {
        Decimal::from_str(fields[idx]).with_context(|| format!("Invalid {}", name))
    };

    Ok(Candle {
        open_time,
        open: price(1, "open")?,
        high: price(2, "high")?,
        low: price(3, "low")?,
        close: price(4, "close")?,
    })
}

/// Push each candle close into `exchange` as a ticker sample, one per
/// `tick`, until the candles run out or `stop` is set.
///
/// Returns the number of samples pushed.
pub async fn feed_closes(
    exchange: &PaperExchange,
    candles: &[Candle],
    tick: Duration,
    stop: &AtomicBool,
) -> usize {
    let mut pushed = 0;
    for candle in candles {
        if stop.load(Ordering::SeqCst) {
            debug!(pushed, "Replay stopped early");
            break;
        }
        exchange
            .push_price(candle.close, candle.open_time + CANDLE_MILLIS)
            .await;
        pushed += 1;
        tokio::time::sleep(tick).await;
    }
    pushed
}
