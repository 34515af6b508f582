//! Volatility Harvester - Main Entry Point
//!
//! Runs a paper trading session replayed from a candle CSV, or prints the
//! persisted state of a previous run.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use volatility_harvester::alert::Alerter;
use volatility_harvester::config::Config;
use volatility_harvester::exchange::replay::{feed_closes, load_candles};
use volatility_harvester::exchange::{ExchangeGateway, PaperExchange};
use volatility_harvester::persistence::{FillJournal, HistoryFile, StateStore};
use volatility_harvester::utils::from_f64_lossy;
use volatility_harvester::Session;

/// Volatility Harvester CLI
#[derive(Parser)]
#[command(name = "volharvest")]
#[command(version, about = "Volatility harvesting rebalancer for a BTC/stablecoin pair")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session on the paper exchange, replaying candle closes as ticks
    Run {
        /// Path to CSV data file (timestamp,open,high,low,close)
        #[arg(short, long)]
        prices: String,

        /// Delay between replayed ticks in milliseconds
        #[arg(long, default_value = "1000")]
        tick_ms: u64,

        /// Leading candles served as history instead of replayed
        #[arg(long, default_value = "120")]
        warmup_candles: usize,

        /// Initial stable balance
        #[arg(short, long, default_value = "10000")]
        stable: f64,

        /// Initial volatile balance
        #[arg(short, long, default_value = "0")]
        base: f64,
    },

    /// Show persisted state, fees and recent fills
    Status {
        /// Data directory of a previous run
        #[arg(short, long, default_value = "data")]
        data_dir: String,

        /// Pair symbol (default: from configuration)
        #[arg(short, long)]
        symbol: Option<String>,

        /// Show more fills and the stored price history size
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Commands::Run {
            prices,
            tick_ms,
            warmup_candles,
            stable,
            base,
        } => run(&prices, tick_ms, warmup_candles, stable, base).await,
        Commands::Status {
            data_dir,
            symbol,
            verbose,
        } => show_status(&data_dir, symbol, verbose),
    }
}

async fn run(
    prices_path: &str,
    tick_ms: u64,
    warmup_candles: usize,
    stable: f64,
    base: f64,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║        Volatility Harvester v{} - Paper Replay          ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    let candles = load_candles(prices_path)?;
    let split = warmup_candles.min(candles.len().saturating_sub(1));
    let (history, live) = candles.split_at(split);
    info!(
        history = history.len(),
        live = live.len(),
        "📂 [REPLAY] Loaded {}",
        prices_path
    );

    let exchange = Arc::new(PaperExchange::new(
        &config.pair.base_asset,
        &config.pair.stable_asset,
        from_f64_lossy(base),
        from_f64_lossy(stable),
    ));
    exchange.set_candles(history.to_vec()).await;

    let alerter = Arc::new(Alerter::new(&config.alert)?);
    if !alerter.is_enabled() {
        info!("🔕 [ALERT] Telegram alerts disabled");
    }

    let gateway: Arc<dyn ExchangeGateway> = exchange.clone();
    let session = Session::start(config.clone(), gateway, alerter)?;

    // Shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    // Let startup subscribe before the first tick
    tokio::time::sleep(Duration::from_millis(500)).await;

    let pushed = feed_closes(&exchange, live, Duration::from_millis(tick_ms), &shutdown).await;
    info!(pushed, "🏁 [REPLAY] Replay finished");

    match session.status().await {
        Ok(status) => info!(
            price = ?status.last_price,
            ratio = status.portfolio.portfolio_ratio,
            real_ratio = status.portfolio.real_ratio,
            buy_price_mean = status.portfolio.buy_price_mean,
            "📊 [STATUS] Final session state"
        ),
        Err(e) => warn!(error = %e, "Session status unavailable"),
    }
    session.stop().await?;

    let base_left = exchange.balance(&config.pair.base_asset).await;
    let stable_left = exchange.balance(&config.pair.stable_asset).await;
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "   {}: {}  {}: {:.2}  Orders: {}  Fees: {:.4}",
        config.pair.base_asset,
        base_left,
        config.pair.stable_asset,
        stable_left,
        exchange.submission_count(),
        exchange.total_fees().await
    );
    Ok(())
}

/// Initialize logging with file and console output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // File appender for detailed logs
    let file_appender = tracing_appender::rolling::hourly("logs", "volatility-harvester.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("volatility_harvester=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let s = &config.strategy;
    info!("📋 Configuration:");
    info!("   Pair: {}", config.pair.symbol());
    info!("   Ratio Bounds: {:.2} - {:.2}", s.min_ratio, s.max_ratio);
    info!("   Working Range: {:.0}% of ATH", s.range_percent);
    info!(
        "   Rebalance Thresholds: buy {:.2}% / sell {:.2}%",
        s.buy_rebalance_percent, s.sell_rebalance_percent
    );
    info!("   MA Length: {} candles", s.ma_length);
    info!("   Fee: {:.3}% per side", s.fee_percent);
    info!(
        "   Order Scaling: {}",
        if config.scaling.enabled {
            format!("{:?} x{}", config.scaling.mode, config.scaling.length)
        } else {
            "off".to_string()
        }
    );
    info!("   Data Dir: {:?}", config.runtime.data_dir);
}

/// Show persisted state of a previous run.
fn show_status(data_dir: &str, symbol: Option<String>, verbose: bool) -> Result<()> {
    let symbol = match symbol {
        Some(symbol) => symbol,
        None => Config::load()?.pair.symbol(),
    };

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              VOLATILITY HARVESTER STATUS                   ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let dir = Path::new(data_dir);
    if !dir.exists() {
        println!("\n❌ Data directory not found: {}", data_dir);
        println!("   The trader has not been started yet, or the path is incorrect.");
        return Ok(());
    }

    match StateStore::in_dir(dir).load(&symbol) {
        Some(snapshot) => {
            println!("\n📊 {} State", symbol);
            println!("   ├─ Traded Price:     {:.2}", snapshot.traded_price);
            println!("   ├─ Buy Price Mean:   {:.2}", snapshot.buy_price_mean);
            println!("   ├─ Target Ratio:     {:.4}", snapshot.portfolio_ratio);
            println!(
                "   ├─ Cross Latches:    over={} under={}",
                snapshot.trend_crossover, snapshot.trend_crossunder
            );
            println!(
                "   └─ Scale Counters:   buy={} sell={}",
                snapshot.buy_counter, snapshot.sell_counter
            );
        }
        None => {
            println!("\n❌ No saved state for {}.", symbol);
        }
    }

    let journal_path = dir.join("journal.db");
    if journal_path.exists() {
        let journal = FillJournal::open(&journal_path)?;
        let summary = journal.fee_summary()?;
        println!("\n💰 Fills & Fees");
        println!("   ├─ Fills:            {}", summary.fills);
        println!("   ├─ Volume:           {:.2}", summary.volume);
        println!("   └─ Fees Paid:        {:.4}", summary.fees);

        let fills = journal.recent_fills(if verbose { 20 } else { 5 })?;
        if !fills.is_empty() {
            println!("\n📈 Recent Fills");
            for fill in &fills {
                println!(
                    "   ├─ {} {} {} @ {:.2} (fee {:.4})",
                    fill.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    fill.side,
                    fill.base_qty,
                    fill.price,
                    fill.fee_stable
                );
            }
        }
    }

    if verbose {
        let samples = HistoryFile::in_dir(dir, &symbol)
            .load()
            .map(|p| p.len())
            .unwrap_or(0);
        println!("\n🗂  Price History: {} samples", samples);
        if samples == 0 {
            println!("   (no stored history)");
        }
    }

    println!();
    Ok(())
}
