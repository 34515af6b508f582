//! End-to-end session against the paper exchange.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use volatility_harvester::alert::Alerter;
use volatility_harvester::config::Config;
use volatility_harvester::exchange::{Candle, ExchangeGateway, OrderSide, PaperExchange};
use volatility_harvester::persistence::{FillJournal, HistoryFile, StateStore};
use volatility_harvester::{Session, SessionHandle};

fn config(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.runtime.data_dir = data_dir.to_path_buf();
    config.runtime.warmup_secs = 0;
    config.strategy.ma_length = 4;
    // Two candles of amplitude
    config.strategy.amplitude_window_secs = 120;
    config.strategy.buy_trend_floor = -1_000_000.0;
    config
}

fn flat_candles(price: Decimal, count: i64) -> Vec<Candle> {
    candles_with_high(price, price, count)
}

fn candles_with_high(close: Decimal, high: Decimal, count: i64) -> Vec<Candle> {
    (0..count)
        .map(|i| Candle {
            open_time: i * 60_000,
            open: close,
            high,
            low: close,
            close,
        })
        .collect()
}

async fn paper(base: Decimal, stable: Decimal) -> Arc<PaperExchange> {
    let exchange = Arc::new(PaperExchange::new("BTC", "USDC", base, stable));
    exchange.set_candles(flat_candles(dec!(100000), 10)).await;
    exchange
}

fn alerter(config: &Config) -> Arc<Alerter> {
    Arc::new(Alerter::new(&config.alert).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_session_buys_the_dip_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let exchange = paper(dec!(0.05), dec!(5000)).await;

    let gateway: Arc<dyn ExchangeGateway> = exchange.clone();
    let session = Session::start(config.clone(), gateway, alerter(&config)).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    // First price starts the session balanced at 0.5
    exchange.push_price(dec!(100000), 11 * 60_000).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let status = session.status().await.unwrap();
    assert_eq!(status.portfolio.traded_price, 100_000.0);
    assert!((status.portfolio.portfolio_ratio - 0.5).abs() < 1e-9);

    // Sharp drop fires a crossunder, but BTC is underweight: no sell
    exchange.push_price(dec!(80000), 12 * 60_000).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    exchange.push_price(dec!(82000), 13 * 60_000).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(exchange.submission_count(), 0);

    // Recovery crosses back over: buy the deficit
    exchange.push_price(dec!(86000), 14 * 60_000).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(exchange.submission_count(), 1);
    assert!(exchange.balance("BTC").await > dec!(0.05));
    assert!(exchange.balance("USDC").await < dec!(5000));

    let status = session.status().await.unwrap();
    assert_eq!(status.portfolio.traded_price, 86_000.0);
    assert_eq!(status.portfolio.buy_price_mean, 86_000.0);
    assert_eq!((status.scale.buy_counter, status.scale.sell_counter), (2, 1));

    assert_ok!(session.stop().await);

    let snapshot = StateStore::in_dir(dir.path()).load("BTCUSDC").unwrap();
    assert_eq!(snapshot.traded_price, 86_000.0);
    assert_eq!(snapshot.buy_price_mean, 86_000.0);
    assert_eq!(snapshot.buy_counter, 2);

    let prices = HistoryFile::in_dir(dir.path(), "BTCUSDC").load().unwrap();
    assert_eq!(prices, vec![100_000.0, 80_000.0, 82_000.0, 86_000.0]);

    let journal = FillJournal::open(dir.path().join("journal.db")).unwrap();
    let summary = journal.fee_summary().unwrap();
    assert_eq!(summary.fills, 1);
    assert!(summary.fees > Decimal::ZERO);

    // A new session on the same data directory resumes the basis
    let exchange = paper(dec!(0.08), dec!(2000)).await;
    let gateway: Arc<dyn ExchangeGateway> = exchange.clone();
    let session = Session::start(config.clone(), gateway, alerter(&config)).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    exchange.push_price(dec!(87000), 20 * 60_000).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let status = session.status().await.unwrap();
    assert_eq!(status.portfolio.traded_price, 86_000.0);
    assert_eq!(status.portfolio.buy_price_mean, 86_000.0);
    assert_eq!(status.scale.buy_counter, 2);
    assert_eq!(status.history_len, 5);
    assert_ok!(session.stop().await);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_startup_is_clean() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let exchange = paper(Decimal::ZERO, dec!(1000)).await;

    let gateway: Arc<dyn ExchangeGateway> = exchange.clone();
    let session = Session::start(config.clone(), gateway, alerter(&config)).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Still waiting for a first price
    let status = session.status().await.unwrap();
    assert_eq!(status.last_price, None);
    assert_ok!(session.stop().await);
    assert_eq!(exchange.submission_count(), 0);
}

/// Narrow working range (5% of a 200000 ATH) so a 12% rally drives the
/// target ratio to zero.
fn sell_config(data_dir: &Path) -> Config {
    let mut config = config(data_dir);
    config.strategy.range_percent = 5.0;
    config.strategy.sell_trend_ceiling = 1_000_000.0;
    config
}

/// Rally from 100000 to 112000 and hold until the fast line crosses
/// under, which sells all but a dust remainder.
async fn sell_down_to_dust(config: &Config) -> (Arc<PaperExchange>, SessionHandle) {
    let exchange = Arc::new(PaperExchange::new("BTC", "USDC", dec!(0.1000005), dec!(1000)));
    exchange
        .set_candles(candles_with_high(dec!(100000), dec!(200000), 10))
        .await;

    let gateway: Arc<dyn ExchangeGateway> = exchange.clone();
    let session = Session::start(config.clone(), gateway, alerter(config)).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    exchange.push_price(dec!(100000), 11 * 60_000).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    for minute in 12..=15 {
        exchange.push_price(dec!(112000), minute * 60_000).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    (exchange, session)
}

#[tokio::test(start_paused = true)]
async fn test_sell_leaving_dust_resets_and_persists_basis() {
    let dir = tempfile::tempdir().unwrap();
    let config = sell_config(dir.path());
    let (exchange, session) = sell_down_to_dust(&config).await;

    assert_eq!(exchange.submission_count(), 1);
    assert_eq!(exchange.balance("BTC").await, dec!(0.0000005));
    assert_eq!(exchange.balance("USDC").await, dec!(12188.8));

    // Fill applied, dust check still pending
    let status = session.status().await.unwrap();
    assert_eq!(status.portfolio.traded_price, 112_000.0);
    assert!(status.portfolio.buy_price_mean < 0.0);
    assert_eq!((status.scale.buy_counter, status.scale.sell_counter), (1, 2));

    tokio::time::sleep(Duration::from_secs(4)).await;
    let status = session.status().await.unwrap();
    assert_eq!(status.portfolio.buy_price_mean, 0.0);
    assert_eq!(status.portfolio.traded_price, 112_000.0);

    // The reset is on disk before any periodic snapshot
    let snapshot = StateStore::in_dir(dir.path()).load("BTCUSDC").unwrap();
    assert_eq!(snapshot.buy_price_mean, 0.0);
    assert_eq!(snapshot.traded_price, 112_000.0);
    assert_eq!(snapshot.sell_counter, 2);

    let journal = FillJournal::open(dir.path().join("journal.db")).unwrap();
    let fills = journal.recent_fills(10).unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].side, OrderSide::Sell);
    assert_eq!(fills[0].base_qty, dec!(0.1));
    let summary = journal.fee_summary().unwrap();
    assert_eq!(summary.volume, dec!(11200));
    assert_eq!(summary.fees, dec!(11.2));

    assert_ok!(session.stop().await);
    let snapshot = StateStore::in_dir(dir.path()).load("BTCUSDC").unwrap();
    assert_eq!(snapshot.buy_price_mean, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_right_after_sell_keeps_dust_reset() {
    let dir = tempfile::tempdir().unwrap();
    let config = sell_config(dir.path());
    let (exchange, session) = sell_down_to_dust(&config).await;
    assert_eq!(exchange.submission_count(), 1);

    // Stop inside the dust check delay
    assert_ok!(session.stop().await);

    let snapshot = StateStore::in_dir(dir.path()).load("BTCUSDC").unwrap();
    assert_eq!(snapshot.traded_price, 112_000.0);
    assert_eq!(snapshot.buy_price_mean, 0.0);
    assert_eq!((snapshot.buy_counter, snapshot.sell_counter), (1, 2));
}

#[tokio::test]
async fn test_start_rejects_zero_eval_interval() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.runtime.eval_interval_ms = 0;
    let exchange = paper(Decimal::ZERO, dec!(1000)).await;

    let gateway: Arc<dyn ExchangeGateway> = exchange;
    assert!(Session::start(config.clone(), gateway, alerter(&config)).is_err());
}
