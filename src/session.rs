//! One trading session: startup, background tasks and shutdown.
//!
//! The supervisor task owns the lifecycle and is driven through
//! [`SessionCommand`]s. Shared analytics live in a single
//! `Mutex<TraderState>`; tasks lock it for pure state updates only and
//! do all gateway, disk and alert I/O outside the lock.
//!
//! Shutdown order: evaluation loop, then streams, then pollers, then a
//! final snapshot and price history flush.

use crate::alert::{fee_summary_message, fill_message, Alerter};
use crate::config::Config;
use crate::exchange::{with_timeout, ExchangeEvent, ExchangeGateway, GatewayError, OrderSide};
use crate::persistence::{FillJournal, HistoryFile, PersistedSnapshot, StateStore};
use crate::strategy::{OrderExecutor, OrderOutcome, RebalanceEngine, TraderState, TraderStatus};
use crate::utils::to_f64_lossy;
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Delay between a sell fill and the dust check.
const DUST_CHECK_DELAY: Duration = Duration::from_secs(3);

pub enum SessionCommand {
    Status(oneshot::Sender<TraderStatus>),
    Stop(oneshot::Sender<()>),
}

/// Control handle returned by [`Session::start`].
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    supervisor: JoinHandle<()>,
}

impl SessionHandle {
    pub async fn status(&self) -> Result<TraderStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Status(tx))
            .await
            .context("Session is not running")?;
        rx.await.context("Session stopped before replying")
    }

    /// Stop the session and wait for the final flush.
    pub async fn stop(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(SessionCommand::Stop(tx)).await.is_ok() {
            rx.await.ok();
        }
        self.supervisor.await.context("Session supervisor panicked")
    }

    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }
}

/// Everything the session tasks share.
struct SessionContext {
    config: Config,
    symbol: String,
    gateway: Arc<dyn ExchangeGateway>,
    alerter: Arc<Alerter>,
    journal: std::sync::Mutex<FillJournal>,
    store: StateStore,
    history_file: HistoryFile,
    state: Mutex<TraderState>,
}

impl SessionContext {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.execution.request_timeout_secs)
    }

    async fn call<T, F>(&self, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        with_timeout(self.timeout(), call).await
    }

    fn save_snapshot(&self, snapshot: &PersistedSnapshot) {
        if let Err(e) = self.store.save(&self.symbol, snapshot) {
            warn!(error = %e, "⚠️  [PERSISTENCE] Failed to save state snapshot");
        }
    }

    /// Snapshot plus price history.
    async fn flush(&self) {
        let (snapshot, prices) = {
            let state = self.state.lock().await;
            (state.snapshot(), state.history.prices())
        };
        self.save_snapshot(&snapshot);
        if let Err(e) = self.history_file.save(&prices) {
            warn!(error = %e, "⚠️  [PERSISTENCE] Failed to save price history");
        }
    }

    async fn refresh_balances(&self) {
        match self.call(self.gateway.get_account_balances()).await {
            Ok(balances) => self.state.lock().await.on_wallet(&balances),
            Err(e) => warn!(error = %e, "Balance refresh failed"),
        }
    }
}

/// Retry `op` every `backoff` until it succeeds or `stop` fires.
async fn retry_until_ok<T, F, Fut>(
    what: &str,
    backoff: Duration,
    stop: &mut watch::Receiver<bool>,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Some(value),
            Err(e) => {
                warn!(attempt, error = %e, "⚠️  [INIT] {} failed, retrying in {:?}", what, backoff);
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = stop.changed() => return None,
        }
    }
}

/// Everything startup produces for the running phase.
struct Started {
    engine: RebalanceEngine,
    ticker: mpsc::Receiver<ExchangeEvent>,
    private: mpsc::Receiver<ExchangeEvent>,
}

pub struct Session;

impl Session {
    /// Start a session for `config.pair` on `gateway`.
    ///
    /// Validates `config` and opens the fill journal in the data directory,
    /// then hands startup (candles, balances, first price) to the
    /// supervisor task.
    pub fn start(
        config: Config,
        gateway: Arc<dyn ExchangeGateway>,
        alerter: Arc<Alerter>,
    ) -> Result<SessionHandle> {
        config.validate()?;
        let data_dir = config.runtime.data_dir.clone();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;
        let journal = FillJournal::open(data_dir.join("journal.db"))?;

        let symbol = config.pair.symbol();
        let ctx = Arc::new(SessionContext {
            store: StateStore::in_dir(&data_dir),
            history_file: HistoryFile::in_dir(&data_dir, &symbol),
            state: Mutex::new(TraderState::new(&config)),
            journal: std::sync::Mutex::new(journal),
            symbol,
            gateway,
            alerter,
            config,
        });

        let (tx, rx) = mpsc::channel(16);
        let supervisor = tokio::spawn(supervise(ctx, rx));
        Ok(SessionHandle {
            commands: tx,
            supervisor,
        })
    }
}

#[instrument(skip_all, fields(symbol = %ctx.symbol))]
async fn supervise(ctx: Arc<SessionContext>, mut commands: mpsc::Receiver<SessionCommand>) {
    info!("🚀 [SESSION] Starting");

    // Startup can block on the exchange; stay responsive meanwhile
    let (startup_stop_tx, startup_stop_rx) = watch::channel(false);
    let boot = startup(ctx.clone(), startup_stop_rx);
    tokio::pin!(boot);

    let mut stopping = false;
    let mut pending_stop: Option<oneshot::Sender<()>> = None;
    let started = loop {
        tokio::select! {
            result = &mut boot => break result,
            cmd = commands.recv(), if !stopping => match cmd {
                Some(SessionCommand::Status(reply)) => {
                    let status = ctx.state.lock().await.status();
                    reply.send(status).ok();
                }
                Some(SessionCommand::Stop(reply)) => {
                    stopping = true;
                    pending_stop = Some(reply);
                    startup_stop_tx.send(true).ok();
                }
                None => {
                    stopping = true;
                    startup_stop_tx.send(true).ok();
                }
            },
        }
    };

    let started = match started {
        Ok(Some(started)) if !stopping => started,
        Ok(_) => {
            info!("🛑 [SESSION] Stopped during startup");
            if let Some(reply) = pending_stop {
                reply.send(()).ok();
            }
            return;
        }
        Err(e) => {
            error!(error = %e, "❌ [SESSION] Startup failed");
            if let Some(reply) = pending_stop {
                reply.send(()).ok();
            }
            return;
        }
    };

    let tasks = spawn_tasks(&ctx, started);
    info!("✅ [SESSION] Running");

    let reply = loop {
        match commands.recv().await {
            Some(SessionCommand::Status(reply)) => {
                let status = ctx.state.lock().await.status();
                reply.send(status).ok();
            }
            Some(SessionCommand::Stop(reply)) => break Some(reply),
            None => break None,
        }
    };

    tasks.shutdown().await;
    ctx.flush().await;
    info!("✅ [SESSION] Final state saved");

    if let Some(reply) = reply {
        reply.send(()).ok();
    }
}

/// Load market context and wait for the first live price.
///
/// Returns `Ok(None)` when stopped before the first price.
async fn startup(ctx: Arc<SessionContext>, mut stop: watch::Receiver<bool>) -> Result<Option<Started>> {
    let runtime = &ctx.config.runtime;
    let symbol = ctx.symbol.clone();

    match ctx.call(ctx.gateway.get_instrument_constraints(&symbol)).await {
        Ok(constraints) => {
            info!(
                min_order_qty = %constraints.min_order_qty,
                min_order_notional = %constraints.min_order_notional,
                qty_step = %constraints.qty_step,
                "✅ [INIT] Instrument constraints loaded"
            );
            ctx.state.lock().await.constraints = constraints;
        }
        Err(e) => warn!(error = %e, "⚠️  [INIT] Failed to load constraints, using defaults"),
    }

    let backoff = Duration::from_secs(runtime.candle_retry_secs);
    let Some(candles) = retry_until_ok("Candle fetch", backoff, &mut stop, || {
        ctx.call(
            ctx.gateway
                .get_historical_candles(&symbol, runtime.candle_interval_minutes),
        )
    })
    .await
    else {
        return Ok(None);
    };
    ctx.state.lock().await.seed_from_candles(&candles);

    ctx.refresh_balances().await;

    let stored = match ctx.history_file.load() {
        Ok(prices) => prices,
        Err(e) => {
            warn!(error = %e, "⚠️  [HISTORY] Unreadable price history, starting empty");
            Vec::new()
        }
    };
    ctx.state.lock().await.history.reseed(&stored);

    let Some(mut ticker) = retry_until_ok("Ticker subscription", backoff, &mut stop, || {
        ctx.call(ctx.gateway.subscribe_ticker(&symbol))
    })
    .await
    else {
        return Ok(None);
    };
    let Some(private) = retry_until_ok("Private subscription", backoff, &mut stop, || {
        ctx.call(ctx.gateway.subscribe_private())
    })
    .await
    else {
        return Ok(None);
    };

    info!("⏳ [INIT] Waiting for first price");
    let (price, period_end) = loop {
        tokio::select! {
            event = ticker.recv() => match event {
                Some(ExchangeEvent::Ticker { price, period_end }) => break (to_f64_lossy(price), period_end),
                Some(other) => debug!(?other, "Ignoring event before first price"),
                None => anyhow::bail!("Ticker stream closed before the first price"),
            },
            _ = stop.changed() => return Ok(None),
        }
    };

    let snapshot = ctx.store.load(&symbol);
    {
        let mut state = ctx.state.lock().await;
        state.on_ticker(price, period_end);
        state.start(price, snapshot.as_ref());
    }
    ctx.flush().await;

    let mut engine = RebalanceEngine::new(ctx.config.strategy.clone());
    engine.on_first_price(Instant::now(), Duration::from_secs(runtime.warmup_secs));
    info!(price, warmup_secs = runtime.warmup_secs, "📡 [INIT] First price received");

    Ok(Some(Started {
        engine,
        ticker,
        private,
    }))
}

/// Running tasks grouped by shutdown stage.
struct Tasks {
    eval_stop: watch::Sender<bool>,
    eval: Vec<JoinHandle<()>>,
    stream_stop: watch::Sender<bool>,
    streams: Vec<JoinHandle<()>>,
    poller_stop: watch::Sender<bool>,
    pollers: Vec<JoinHandle<()>>,
}

impl Tasks {
    async fn shutdown(self) {
        info!("🛑 [SHUTDOWN] Stopping evaluation loop");
        stop_group(&self.eval_stop, self.eval).await;
        info!("🛑 [SHUTDOWN] Stopping streams");
        stop_group(&self.stream_stop, self.streams).await;
        info!("🛑 [SHUTDOWN] Stopping pollers");
        stop_group(&self.poller_stop, self.pollers).await;
    }
}

async fn stop_group(stop: &watch::Sender<bool>, handles: Vec<JoinHandle<()>>) {
    stop.send(true).ok();
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Session task panicked");
        }
    }
}

fn spawn_tasks(ctx: &Arc<SessionContext>, started: Started) -> Tasks {
    let (eval_stop, eval_rx) = watch::channel(false);
    let (stream_stop, stream_rx) = watch::channel(false);
    let (poller_stop, poller_rx) = watch::channel(false);

    let eval = vec![tokio::spawn(evaluation_loop(
        ctx.clone(),
        started.engine,
        eval_rx,
    ))];
    let streams = vec![
        tokio::spawn(ticker_loop(ctx.clone(), started.ticker, stream_rx.clone())),
        tokio::spawn(private_loop(ctx.clone(), started.private, stream_rx)),
    ];
    let pollers = vec![
        tokio::spawn(balance_poller(ctx.clone(), poller_rx.clone())),
        tokio::spawn(snapshot_loop(ctx.clone(), poller_rx.clone())),
        tokio::spawn(fee_summary_loop(ctx.clone(), poller_rx)),
    ];

    Tasks {
        eval_stop,
        eval,
        stream_stop,
        streams,
        poller_stop,
        pollers,
    }
}

fn interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn evaluation_loop(
    ctx: Arc<SessionContext>,
    mut engine: RebalanceEngine,
    mut stop: watch::Receiver<bool>,
) {
    let executor = OrderExecutor::new(ctx.config.execution.clone(), ctx.config.pair.clone());
    let mut tick = interval(Duration::from_millis(ctx.config.runtime.eval_interval_ms));
    let pause = Duration::from_secs(ctx.config.execution.post_trade_pause_secs);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = stop.changed() => break,
        }

        let (evaluation, price, constraints, snapshot) = {
            let mut state = ctx.state.lock().await;
            let evaluation = engine.evaluate(&mut state, Instant::now());
            let snapshot = evaluation.checkpoint.then(|| state.snapshot());
            (
                evaluation,
                state.last_price().unwrap_or_default(),
                state.constraints.clone(),
                snapshot,
            )
        };

        if let Some(snapshot) = snapshot {
            ctx.save_snapshot(&snapshot);
        }

        let Some((side, quantity)) = evaluation.decision.order() else {
            continue;
        };

        info!(%side, %quantity, price, "💱 [REBALANCE] Submitting market order");
        let outcome = executor
            .submit(
                ctx.gateway.as_ref(),
                side,
                quantity,
                &constraints,
                price,
            )
            .await;
        match &outcome {
            OrderOutcome::Accepted { attempts, quantity } => {
                info!(%side, %quantity, attempts, "✅ [REBALANCE] Order accepted")
            }
            other => warn!(%side, outcome = ?other, "⚠️  [REBALANCE] Order not placed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = stop.changed() => break,
        }
    }
    debug!("Evaluation loop stopped");
}

async fn ticker_loop(
    ctx: Arc<SessionContext>,
    mut ticker: mpsc::Receiver<ExchangeEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            event = ticker.recv() => event,
            _ = stop.changed() => break,
        };
        match event {
            Some(ExchangeEvent::Ticker { price, period_end }) => {
                ctx.state
                    .lock()
                    .await
                    .on_ticker(to_f64_lossy(price), period_end);
            }
            Some(other) => debug!(?other, "Ignoring non-ticker event"),
            None => {
                warn!("⚠️  [STREAM] Ticker stream closed");
                break;
            }
        }
    }
    debug!("Ticker loop stopped");
}

async fn private_loop(
    ctx: Arc<SessionContext>,
    mut private: mpsc::Receiver<ExchangeEvent>,
    mut stop: watch::Receiver<bool>,
) {
    let mut dust_checks = JoinSet::new();
    loop {
        let event = tokio::select! {
            event = private.recv() => event,
            Some(_) = dust_checks.join_next(), if !dust_checks.is_empty() => continue,
            _ = stop.changed() => break,
        };
        match event {
            Some(ExchangeEvent::Wallet { balances }) => {
                ctx.state.lock().await.on_wallet(&balances);
            }
            Some(ExchangeEvent::OrderFill(fill)) => {
                let (record, mean, snapshot) = {
                    let mut state = ctx.state.lock().await;
                    let record = state.on_fill(&fill);
                    (record, state.portfolio.buy_price_mean, state.snapshot())
                };
                let Some(record) = record else {
                    continue;
                };

                info!(
                    side = %record.side,
                    price = %record.price,
                    base_qty = %record.base_qty,
                    fee = %record.fee_stable,
                    buy_price_mean = mean,
                    "💰 [FILL] Order filled"
                );
                ctx.save_snapshot(&snapshot);
                if let Ok(journal) = ctx.journal.lock() {
                    if let Err(e) = journal.record_fill(&record) {
                        warn!(error = %e, "⚠️  [JOURNAL] Failed to record fill");
                    }
                }

                let text = fill_message(
                    record.side,
                    to_f64_lossy(record.price),
                    to_f64_lossy(record.quote_value),
                    mean,
                );
                let alerter = ctx.alerter.clone();
                tokio::spawn(async move { alerter.notify(&text).await });

                if record.side == OrderSide::Sell {
                    dust_checks.spawn(dust_check(ctx.clone()));
                }
            }
            Some(ExchangeEvent::Unknown { topic }) => debug!(%topic, "Unknown private event"),
            Some(other) => debug!(?other, "Ignoring event on private stream"),
            None => {
                warn!("⚠️  [STREAM] Private stream closed");
                break;
            }
        }
    }

    // Pending resets must land before the final flush
    if !dust_checks.is_empty() {
        debug!(pending = dust_checks.len(), "Waiting for dust checks");
        while dust_checks.join_next().await.is_some() {}
    }
    debug!("Private loop stopped");
}

/// After a sell settles, clear the basis if only dust remains.
async fn dust_check(ctx: Arc<SessionContext>) {
    tokio::time::sleep(DUST_CHECK_DELAY).await;
    let dust_value = ctx.config.strategy.dust_value;
    let snapshot = {
        let mut state = ctx.state.lock().await;
        let Some(price) = state.last_price() else {
            return;
        };
        if !state.portfolio.reset_if_dust(price, dust_value) {
            return;
        }
        info!(price, dust_value, "🧹 [STATE] Position is dust, cost basis reset");
        state.snapshot()
    };
    ctx.save_snapshot(&snapshot);
}

async fn balance_poller(ctx: Arc<SessionContext>, mut stop: watch::Receiver<bool>) {
    let mut tick = interval(Duration::from_secs(ctx.config.runtime.balance_poll_secs));
    loop {
        tokio::select! {
            _ = tick.tick() => ctx.refresh_balances().await,
            _ = stop.changed() => break,
        }
    }
    debug!("Balance poller stopped");
}

async fn snapshot_loop(ctx: Arc<SessionContext>, mut stop: watch::Receiver<bool>) {
    let mut tick = interval(Duration::from_secs(ctx.config.runtime.snapshot_secs));
    tick.tick().await;
    loop {
        tokio::select! {
            _ = tick.tick() => {
                ctx.flush().await;
                debug!("💾 [PERSISTENCE] Periodic snapshot saved");
            }
            _ = stop.changed() => break,
        }
    }
    debug!("Snapshot loop stopped");
}

async fn fee_summary_loop(ctx: Arc<SessionContext>, mut stop: watch::Receiver<bool>) {
    let mut tick = interval(Duration::from_secs(ctx.config.runtime.fee_summary_secs));
    tick.tick().await;
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = stop.changed() => break,
        }

        let summary = match ctx.journal.lock() {
            Ok(journal) => journal.fee_summary(),
            Err(_) => continue,
        };
        match summary {
            Ok(summary) => {
                info!(
                    fills = summary.fills,
                    volume = %summary.volume,
                    fees = %summary.fees,
                    "📊 [FEES] Fee summary"
                );
                let text = fee_summary_message(
                    summary.fills,
                    to_f64_lossy(summary.volume),
                    to_f64_lossy(summary.fees),
                    &ctx.config.pair.stable_asset,
                );
                ctx.alerter.notify(&text).await;
            }
            Err(e) => warn!(error = %e, "Failed to read fee summary"),
        }
    }
    debug!("Fee summary loop stopped");
}
