//! Trader: startup, the per-period cycle, and the run loop.
//!
//! Handles:
//! - Resolving algorithm settings and validating the setup
//! - Syncing account, positions, and orders from the broker
//! - Backfilling history for every watched symbol
//! - Collecting streamed bars and forcing a flush when the deadline passes
//! - Running each cycle: store, aggregate, reconcile, refresh, schedule, submit

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Timelike, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::algo::{AlgoSettings, Algorithm, OrderRequest};
use crate::api::{occ_underlying, BarSink, Broker, Streamer};
use crate::config::TraderConfig;
use crate::engine::{
    fill_missing, reconcile_orders, AlgorithmHandle, Arrival, BarCollector, CadenceGate,
    FlushReason, FlushedBatch, Portfolio, RefreshKind, Scheduler, Watchdog,
};
use crate::error::{EngineError, EngineResult};
use crate::models::{AssetClass, BarMap, EquityPoint, Interval, Order, Transaction};
use crate::storage::Storage;

/// Summary of one completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub period: u64,
    pub timestamp: DateTime<Utc>,
    pub reason: FlushReason,
    pub fresh: usize,
    pub synthesized: BTreeSet<String>,
    pub order_completed: bool,
    pub refresh: RefreshKind,
    pub invoked: Vec<String>,
    pub deactivated: Vec<String>,
    /// Orders the broker accepted this cycle
    pub submitted: Vec<Order>,
}

/// Point-in-time view of the trader's state.
#[derive(Debug, Clone)]
pub struct TraderSnapshot {
    pub started: bool,
    pub watch: Vec<String>,
    pub interval: Interval,
    pub fetch_interval: Interval,
    pub aggregations: Vec<Interval>,
    pub orders: Vec<Order>,
    pub portfolio: Portfolio,
    pub active_algos: Vec<String>,
    /// Flushes handled, including abandoned cycles
    pub cycles: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub last_report: Option<CycleReport>,
}

struct Session {
    started: bool,
    watchlist: Vec<String>,
    pending_algos: Vec<Box<dyn Algorithm>>,

    watch: BTreeSet<String>,
    interval: Interval,
    fetch_interval: Interval,
    aggregations: BTreeSet<Interval>,

    collector: BarCollector,
    watchdog: Watchdog,
    timer: Option<(u64, JoinHandle<()>)>,
    faults: Option<mpsc::UnboundedSender<EngineError>>,

    orders: Vec<Order>,
    portfolio: Portfolio,
    scheduler: Scheduler,

    timestamp: Option<DateTime<Utc>>,
    timestamp_prev: Option<DateTime<Utc>>,
    cycles: u64,
    last_report: Option<CycleReport>,
}

struct Inner {
    config: TraderConfig,
    streamer: Arc<dyn Streamer>,
    broker: Arc<dyn Broker>,
    storage: Arc<dyn Storage>,
    session: Mutex<Session>,
}

/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct Trader {
    inner: Arc<Inner>,
}

impl Trader {
    pub fn new(
        config: TraderConfig,
        streamer: Arc<dyn Streamer>,
        broker: Arc<dyn Broker>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let session = Session {
            started: false,
            watchlist: config.watchlist.clone(),
            pending_algos: Vec::new(),
            watch: BTreeSet::new(),
            interval: config.interval,
            fetch_interval: config.interval,
            aggregations: BTreeSet::new(),
            collector: BarCollector::new(Vec::<String>::new()),
            watchdog: Watchdog::from_millis(config.timeout_ms),
            timer: None,
            faults: None,
            orders: Vec::new(),
            portfolio: Portfolio::default(),
            scheduler: Scheduler::new(CadenceGate::new(chrono::NaiveTime::default())),
            timestamp: None,
            timestamp_prev: None,
            cycles: 0,
            last_report: None,
        };

        Self {
            inner: Arc::new(Inner {
                config,
                streamer,
                broker,
                storage,
                session: Mutex::new(session),
            }),
        }
    }

    /// Replace the trader-level watchlist. Only valid before start.
    pub async fn set_symbol(&self, symbols: Vec<String>) -> EngineResult<()> {
        let mut session = self.inner.session.lock().await;
        if session.started {
            return Err(EngineError::config("cannot change the watchlist after start"));
        }
        session.watchlist = symbols;
        Ok(())
    }

    /// Register an algorithm. Only valid before start.
    pub async fn add_algo(&self, algo: Box<dyn Algorithm>) -> EngineResult<()> {
        let mut session = self.inner.session.lock().await;
        if session.started {
            return Err(EngineError::config("cannot add algorithms after start"));
        }
        session.pending_algos.push(algo);
        Ok(())
    }

    /// Validate the setup, sync from the broker, and backfill history.
    pub async fn start(&self) -> EngineResult<()> {
        let inner = &self.inner;
        let config = &inner.config;
        let mut session = inner.session.lock().await;

        if session.started {
            return Err(EngineError::config("trader already started"));
        }
        if session.pending_algos.is_empty() {
            return Err(EngineError::config("no algorithm specified"));
        }

        let gate = CadenceGate::new(config.cutoff()?);

        if let Some(agg) = config.aggregations.iter().find(|a| **a <= config.interval) {
            return Err(EngineError::config(format!(
                "aggregation {} must be coarser than the trader interval {}",
                agg, config.interval
            )));
        }

        // 1. resolve per-algorithm settings
        let mut watch: BTreeSet<String> = session.watchlist.iter().cloned().collect();
        let mut aggregations: BTreeSet<Interval> = config.aggregations.iter().copied().collect();
        let mut resolved = Vec::new();

        for algo in std::mem::take(&mut session.pending_algos) {
            let overrides = algo.config();
            let interval = overrides.interval.unwrap_or(config.interval);

            let algo_aggs = match overrides.aggregations {
                Some(aggs) => {
                    if let Some(agg) = aggs.iter().find(|a| **a <= interval) {
                        return Err(EngineError::config(format!(
                            "algorithm {} aggregation {} must be coarser than its interval {}",
                            algo.name(),
                            agg,
                            interval
                        )));
                    }
                    aggs
                }
                None => config
                    .aggregations
                    .iter()
                    .copied()
                    .filter(|a| *a > interval)
                    .collect(),
            };

            let watchlist = overrides
                .watchlist
                .unwrap_or_else(|| session.watchlist.clone());

            watch.extend(watchlist.iter().cloned());
            aggregations.extend(algo_aggs.iter().copied());
            aggregations.insert(interval);

            resolved.push((
                algo,
                AlgoSettings {
                    interval,
                    watchlist,
                    aggregations: algo_aggs,
                },
            ));
        }

        // 2. engine interval is the finest algorithm interval
        let interval = resolved
            .iter()
            .map(|(_, s)| s.interval)
            .min()
            .unwrap_or(config.interval);

        // 3. account, then positions and open orders when syncing
        let broker = inner.broker.as_ref();
        let mut portfolio = if config.sync {
            Portfolio::fetch(broker, None).await?
        } else {
            Portfolio {
                account: broker.fetch_account().await?,
                ..Portfolio::default()
            }
        };
        let mut orders = Vec::new();

        if config.sync {
            broker.update_option_positions(&mut portfolio.options).await?;

            orders = broker.fetch_order_queue().await?;
            for order in &orders {
                let asset_class = order.asset_class.ok_or_else(|| {
                    EngineError::DataContract(format!(
                        "queued order {} for {} has no type tag",
                        order.id, order.symbol
                    ))
                })?;
                let symbol = match asset_class {
                    AssetClass::Option => occ_underlying(&order.symbol),
                    _ => order.symbol.clone(),
                };
                watch.insert(symbol);
            }
            watch.extend(portfolio.symbols());

            info!(
                cash = %portfolio.account.cash,
                equity = %portfolio.account.equity,
                positions = portfolio.all().count(),
                orders = orders.len(),
                "Synced with broker"
            );
        }

        if watch.is_empty() {
            return Err(EngineError::config("nothing to watch"));
        }

        // 4. streamer capability and the fetch interval
        let streamer = &inner.streamer;
        if !streamer.has_interval(interval) {
            return Err(EngineError::config(format!(
                "{} does not support interval {}",
                streamer.name(),
                interval
            )));
        }

        let fetch_interval = streamer.fetch_interval(interval);
        aggregations.remove(&fetch_interval);
        if let Some(agg) = aggregations.iter().find(|a| **a < fetch_interval) {
            return Err(EngineError::config(format!(
                "{} streams {} bars, which cannot be aggregated into {}",
                streamer.name(),
                fetch_interval,
                agg
            )));
        }

        let symbols: Vec<String> = watch.iter().cloned().collect();
        info!(symbols = ?symbols, interval = %interval, fetch_interval = %fetch_interval, "Watchlist");
        broker.setup(&symbols, interval).await?;

        // 5. backfill history at every stored interval
        for symbol in &symbols {
            for target in std::iter::once(fetch_interval).chain(aggregations.iter().copied()) {
                let bars = streamer.fetch_price_history(symbol, target).await?;
                debug!(symbol = %symbol, interval = %target, bars = bars.len(), "Backfilled");
                inner.storage.store(symbol, target, &bars).await?;
            }
        }

        // 6. algorithm setup
        let mut scheduler = Scheduler::new(gate);
        for (mut algo, settings) in resolved {
            algo.setup(&settings).await.map_err(|e| {
                EngineError::config(format!("algorithm {} failed setup: {:#}", algo.name(), e))
            })?;
            info!(
                algo = %algo.name(),
                interval = %settings.interval,
                symbols = settings.watchlist.len(),
                "Algorithm ready"
            );
            scheduler.push(AlgorithmHandle::new(algo, settings));
        }

        session.collector = BarCollector::new(symbols);
        session.watchdog = Watchdog::from_millis(config.timeout_ms);
        session.watch = watch;
        session.interval = interval;
        session.fetch_interval = fetch_interval;
        session.aggregations = aggregations;
        session.orders = orders;
        session.portfolio = portfolio;
        session.scheduler = scheduler;
        session.started = true;

        info!(
            streamer = streamer.name(),
            broker = broker.name(),
            algorithms = session.scheduler.len(),
            aggregations = ?session.aggregations,
            "Trader started"
        );

        Ok(())
    }

    /// Start, then process streamed bars until the stream ends, a fatal
    /// error occurs, or Ctrl+C is received.
    pub async fn run(&self, kill_switch: bool) -> EngineResult<()> {
        self.start().await?;

        let (fault_tx, mut fault_rx) = mpsc::unbounded_channel();
        let (symbols, fetch_interval) = {
            let mut session = self.inner.session.lock().await;
            session.faults = Some(fault_tx);
            (
                session.watch.iter().cloned().collect::<Vec<_>>(),
                session.fetch_interval,
            )
        };

        let (sink, mut bars_rx) = BarSink::channel();
        let streamer = Arc::clone(&self.inner.streamer);
        let stream_task = tokio::spawn(async move {
            streamer.start(symbols, fetch_interval, sink, kill_switch).await
        });

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                msg = bars_rx.recv() => match msg {
                    Some(bars) => {
                        if let Err(e) = self.receive(bars).await {
                            stream_task.abort();
                            return Err(e);
                        }
                    }
                    None => break,
                },
                Some(fault) = fault_rx.recv() => {
                    stream_task.abort();
                    return Err(fault);
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    stream_task.abort();
                    if let Some((_, timer)) = self.inner.session.lock().await.timer.take() {
                        timer.abort();
                    }
                    return Ok(());
                }
            }
        }

        // the stream is done; let an outstanding period time out
        self.settle().await?;
        self.inner.session.lock().await.faults = None;
        if let Ok(fault) = fault_rx.try_recv() {
            return Err(fault);
        }

        stream_task
            .await
            .map_err(|e| anyhow!("streamer task failed: {}", e))??;

        info!("Stream ended");
        Ok(())
    }

    /// Hand one push of bars to the collector and run the cycle if the
    /// period is complete.
    pub async fn receive(&self, bars: BarMap) -> EngineResult<()> {
        let mut session = self.inner.session.lock().await;
        if !session.started {
            return Err(EngineError::config("bars received before start"));
        }

        match session.collector.receive(bars) {
            Arrival::Started(period) => {
                let trader = self.clone();
                let timer = session
                    .watchdog
                    .arm(period, move |period| async move { trader.on_deadline(period).await });
                session.timer = Some((period, timer));
                Ok(())
            }
            Arrival::Collecting | Arrival::Ignored => Ok(()),
            Arrival::Complete(batch) => {
                if let Some((_, timer)) = session.timer.take() {
                    timer.abort();
                }
                debug!(period = batch.period, "All bars received");
                self.flush(&mut session, batch).await
            }
        }
    }

    /// Wait for an armed deadline, if any, to fire and finish.
    pub async fn settle(&self) -> EngineResult<()> {
        let timer = self.inner.session.lock().await.timer.take();
        match timer {
            Some((_, timer)) => match timer.await {
                Ok(()) => Ok(()),
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => Err(anyhow!("deadline task failed: {}", e).into()),
            },
            None => Ok(()),
        }
    }

    pub async fn snapshot(&self) -> TraderSnapshot {
        let session = self.inner.session.lock().await;
        TraderSnapshot {
            started: session.started,
            watch: session.watch.iter().cloned().collect(),
            interval: session.interval,
            fetch_interval: session.fetch_interval,
            aggregations: session.aggregations.iter().copied().collect(),
            orders: session.orders.clone(),
            portfolio: session.portfolio.clone(),
            active_algos: session.scheduler.active(),
            cycles: session.cycles,
            timestamp: session.timestamp,
            last_report: session.last_report.clone(),
        }
    }

    async fn on_deadline(&self, period: u64) {
        let mut session = self.inner.session.lock().await;
        if matches!(session.timer, Some((armed, _)) if armed == period) {
            session.timer = None;
        }

        let Some(partial) = session.collector.take_timed_out(period) else {
            debug!(period, "Period already flushed");
            return;
        };

        warn!(period, missing = ?partial.missing, "Timeout reached, forcing flush");

        let fetch_interval = session.fetch_interval;
        let result = match fill_missing(partial, self.inner.storage.as_ref(), fetch_interval).await {
            Ok(batch) => self.flush(&mut session, batch).await,
            Err(e) if !e.is_fatal() => {
                session.cycles += 1;
                error!(period, error = %e, "Could not synthesize missing bars, cycle abandoned");
                Ok(())
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            match &session.faults {
                Some(faults) => {
                    let _ = faults.send(e);
                }
                None => error!(period, error = %e, "Fatal error in forced flush"),
            }
        }
    }

    async fn flush(&self, session: &mut Session, batch: FlushedBatch) -> EngineResult<()> {
        session.cycles += 1;
        let period = batch.period;

        match self.cycle(session, batch).await {
            Ok(report) => {
                session.last_report = Some(report);
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                error!(period, error = %e, "Fatal error in cycle");
                Err(e)
            }
            Err(e) => {
                error!(period, error = %e, "Cycle abandoned");
                Ok(())
            }
        }
    }

    async fn cycle(&self, session: &mut Session, batch: FlushedBatch) -> EngineResult<CycleReport> {
        let inner = &self.inner;
        let ts = batch.timestamp;

        session.timestamp_prev = session.timestamp.replace(ts);
        if let Some(prev) = session.timestamp_prev {
            if prev.date_naive() != ts.date_naive() {
                info!(date = %ts.date_naive(), "New trading day");
            }
        }

        info!(
            period = batch.period,
            ts = %ts,
            reason = ?batch.reason,
            fresh = batch.fresh_count(),
            synthesized = ?batch.synthesized,
            "Processing bars"
        );

        inner.broker.on_bars(&batch.bars).await?;

        let hours = inner.config.cred_refresh_hours;
        if hours > 0 && ts.hour() % hours == 0 && ts.minute() == 0 {
            info!("Refreshing streamer credentials");
            inner.streamer.refresh_cred().await?;
        }

        for (symbol, bar) in &batch.bars {
            inner
                .storage
                .store(symbol, session.fetch_interval, std::slice::from_ref(bar))
                .await?;
        }
        for (symbol, bar) in &batch.bars {
            for target in &session.aggregations {
                inner
                    .storage
                    .aggregate(symbol, session.fetch_interval, *target, bar.timestamp)
                    .await?;
            }
        }

        let order_completed = reconcile_orders(&mut session.orders, inner.broker.as_ref()).await?;
        let refresh = session
            .portfolio
            .update(inner.broker.as_ref(), &batch.bars, order_completed, &session.watch)
            .await?;

        inner
            .storage
            .record_equity(&EquityPoint {
                timestamp: ts,
                cash: session.portfolio.account.cash,
                equity: session.portfolio.account.equity,
            })
            .await?;

        let outcome = session
            .scheduler
            .run_cycle(&batch, &session.portfolio, &session.orders, inner.storage.as_ref())
            .await;

        let mut submitted = Vec::new();
        for (algo, request) in outcome.requests {
            match self.submit(&request).await {
                Ok(order) => {
                    info!(
                        algo = %algo,
                        id = %order.id,
                        side = request.side().as_str(),
                        symbol = %request.symbol(),
                        quantity = %request.quantity(),
                        "Order submitted"
                    );
                    inner
                        .storage
                        .record_transaction(&Transaction {
                            timestamp: ts,
                            side: request.side(),
                            asset_class: request.asset_class(),
                            symbol: request.symbol().to_string(),
                            quantity: request.quantity(),
                            order_id: order.id.clone(),
                        })
                        .await?;
                    session.orders.push(order.clone());
                    submitted.push(order);
                }
                Err(e) => warn!(
                    algo = %algo,
                    symbol = %request.symbol(),
                    error = %e,
                    "Order rejected"
                ),
            }
        }

        Ok(CycleReport {
            period: batch.period,
            timestamp: ts,
            reason: batch.reason,
            fresh: batch.fresh_count(),
            synthesized: batch.synthesized,
            order_completed,
            refresh,
            invoked: outcome.invoked,
            deactivated: outcome.deactivated,
            submitted,
        })
    }

    async fn submit(&self, request: &OrderRequest) -> anyhow::Result<Order> {
        let broker = self.inner.broker.as_ref();
        match request {
            OrderRequest::Equity {
                side,
                symbol,
                quantity,
                time_in_force,
                extended,
            } => match side {
                crate::models::OrderSide::Buy => {
                    broker.buy(symbol, *quantity, *time_in_force, *extended).await
                }
                crate::models::OrderSide::Sell => {
                    broker.sell(symbol, *quantity, *time_in_force, *extended).await
                }
            },
            OrderRequest::Option {
                side,
                contract,
                quantity,
                time_in_force,
            } => match side {
                crate::models::OrderSide::Buy => {
                    broker.buy_option(contract, *quantity, *time_in_force).await
                }
                crate::models::OrderSide::Sell => {
                    broker.sell_option(contract, *quantity, *time_in_force).await
                }
            },
        }
    }
}
