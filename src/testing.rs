//! Scripted collaborators and algorithms shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;

use crate::algo::{AlgoConfig, AlgoContext, Algorithm};
use crate::api::{BarSink, Broker, Streamer};
use crate::models::{
    Account, AssetClass, Bar, BarMap, Interval, Order, OrderSide, OrderStatus, Position,
    TimeInForce,
};

pub fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, hour, minute, 0).unwrap()
}

pub fn flat_bar(at: DateTime<Utc>, close: Decimal) -> Bar {
    Bar::new(at, close, close, close, close, dec!(10))
}

pub fn fragment(symbol: &str, at: DateTime<Utc>, close: Decimal) -> BarMap {
    BarMap::from([(symbol.to_string(), flat_bar(at, close))])
}

#[derive(Default)]
struct BrokerState {
    account: Account,
    queue: Vec<Order>,
    orders: HashMap<String, Order>,
    stocks: Vec<Position>,
    options: Vec<Position>,
    cryptos: Vec<Position>,
    option_price: Option<Decimal>,
    status_queries: Vec<(AssetClass, String)>,
    submitted: Vec<(OrderSide, String, Decimal)>,
    bars_seen: Vec<BarMap>,
    full_refreshes: usize,
    option_updates: usize,
    fail_on_bars: bool,
    reject_orders: bool,
    next_id: usize,
}

/// Broker whose answers are set by the test.
#[derive(Default)]
pub struct StubBroker {
    state: Mutex<BrokerState>,
}

impl StubBroker {
    pub fn order(id: &str, symbol: &str, asset_class: AssetClass, side: OrderSide) -> Order {
        Order {
            id: id.to_string(),
            asset_class: Some(asset_class),
            symbol: symbol.to_string(),
            side,
            quantity: dec!(1),
            time_in_force: TimeInForce::Gtc,
            status: OrderStatus::Pending,
            filled_price: None,
            submitted_at: ts(9, 30),
        }
    }

    /// Make status queries for `order` report `status`.
    pub async fn set_status(&self, order: &Order, status: OrderStatus) {
        let mut state = self.state.lock().await;
        let mut tracked = order.clone();
        tracked.status = status;
        state.orders.insert(tracked.id.clone(), tracked);
    }

    pub async fn set_queue(&self, queue: Vec<Order>) {
        let mut state = self.state.lock().await;
        for order in &queue {
            state.orders.insert(order.id.clone(), order.clone());
        }
        state.queue = queue;
    }

    pub async fn set_account(&self, account: Account) {
        self.state.lock().await.account = account;
    }

    pub async fn set_positions(
        &self,
        stocks: Vec<Position>,
        options: Vec<Position>,
        cryptos: Vec<Position>,
    ) {
        let mut state = self.state.lock().await;
        state.stocks = stocks;
        state.options = options;
        state.cryptos = cryptos;
    }

    pub async fn set_option_price(&self, price: Decimal) {
        self.state.lock().await.option_price = Some(price);
    }

    pub async fn set_fail_on_bars(&self, fail: bool) {
        self.state.lock().await.fail_on_bars = fail;
    }

    pub async fn set_reject_orders(&self, reject: bool) {
        self.state.lock().await.reject_orders = reject;
    }

    pub async fn status_queries(&self) -> Vec<(AssetClass, String)> {
        self.state.lock().await.status_queries.clone()
    }

    pub async fn submitted(&self) -> Vec<(OrderSide, String, Decimal)> {
        self.state.lock().await.submitted.clone()
    }

    pub async fn bars_seen(&self) -> Vec<BarMap> {
        self.state.lock().await.bars_seen.clone()
    }

    pub async fn full_refreshes(&self) -> usize {
        self.state.lock().await.full_refreshes
    }

    pub async fn option_updates(&self) -> usize {
        self.state.lock().await.option_updates
    }

    async fn status(&self, asset_class: AssetClass, id: &str) -> Result<Order> {
        let mut state = self.state.lock().await;
        state.status_queries.push((asset_class, id.to_string()));
        state
            .orders
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("order {} not found", id))
    }

    async fn place(&self, side: OrderSide, symbol: &str, quantity: Decimal, class: AssetClass) -> Result<Order> {
        let mut state = self.state.lock().await;
        if state.reject_orders {
            bail!("order rejected");
        }
        state.next_id += 1;
        let id = format!("stub-{}", state.next_id);
        let order = Order {
            quantity,
            ..Self::order(&id, symbol, class, side)
        };
        state.orders.insert(id, order.clone());
        state.submitted.push((side, symbol.to_string(), quantity));
        Ok(order)
    }
}

#[async_trait]
impl Broker for StubBroker {
    fn name(&self) -> &str {
        "stub"
    }

    async fn on_bars(&self, bars: &BarMap) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_on_bars {
            bail!("broker unavailable");
        }
        state.bars_seen.push(bars.clone());
        Ok(())
    }

    async fn fetch_account(&self) -> Result<Account> {
        Ok(self.state.lock().await.account.clone())
    }

    async fn fetch_order_queue(&self) -> Result<Vec<Order>> {
        Ok(self.state.lock().await.queue.clone())
    }

    async fn fetch_stock_positions(&self) -> Result<Vec<Position>> {
        let mut state = self.state.lock().await;
        state.full_refreshes += 1;
        Ok(state.stocks.clone())
    }

    async fn fetch_option_positions(&self) -> Result<Vec<Position>> {
        Ok(self.state.lock().await.options.clone())
    }

    async fn fetch_crypto_positions(&self) -> Result<Vec<Position>> {
        Ok(self.state.lock().await.cryptos.clone())
    }

    async fn fetch_stock_order_status(&self, id: &str) -> Result<Order> {
        self.status(AssetClass::Stock, id).await
    }

    async fn fetch_option_order_status(&self, id: &str) -> Result<Order> {
        self.status(AssetClass::Option, id).await
    }

    async fn fetch_crypto_order_status(&self, id: &str) -> Result<Order> {
        self.status(AssetClass::Crypto, id).await
    }

    async fn update_option_positions(&self, positions: &mut [Position]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.option_updates += 1;
        if let Some(price) = state.option_price {
            for pos in positions.iter_mut() {
                pos.update_price(price);
            }
        }
        Ok(())
    }

    async fn buy(&self, symbol: &str, quantity: Decimal, _: TimeInForce, _: bool) -> Result<Order> {
        self.place(OrderSide::Buy, symbol, quantity, AssetClass::of_symbol(symbol)).await
    }

    async fn sell(&self, symbol: &str, quantity: Decimal, _: TimeInForce, _: bool) -> Result<Order> {
        self.place(OrderSide::Sell, symbol, quantity, AssetClass::of_symbol(symbol)).await
    }

    async fn buy_option(&self, contract: &str, quantity: Decimal, _: TimeInForce) -> Result<Order> {
        self.place(OrderSide::Buy, contract, quantity, AssetClass::Option).await
    }

    async fn sell_option(&self, contract: &str, quantity: Decimal, _: TimeInForce) -> Result<Order> {
        self.place(OrderSide::Sell, contract, quantity, AssetClass::Option).await
    }
}

/// Streamer that serves fixed history and plays back a push script.
pub struct StubStreamer {
    intervals: Vec<Interval>,
    fetch: Option<Interval>,
    history: HashMap<(String, Interval), Vec<Bar>>,
    script: Mutex<Vec<(Duration, BarMap)>>,
    fetched: Mutex<Vec<(String, Interval)>>,
    cred_refreshes: AtomicUsize,
}

impl Default for StubStreamer {
    fn default() -> Self {
        Self {
            intervals: Interval::ALL.to_vec(),
            fetch: None,
            history: HashMap::new(),
            script: Mutex::new(Vec::new()),
            fetched: Mutex::new(Vec::new()),
            cred_refreshes: AtomicUsize::new(0),
        }
    }
}

impl StubStreamer {
    pub fn with_intervals(mut self, intervals: Vec<Interval>) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn with_fetch_interval(mut self, interval: Interval) -> Self {
        self.fetch = Some(interval);
        self
    }

    pub fn with_history(mut self, symbol: &str, interval: Interval, bars: Vec<Bar>) -> Self {
        self.history.insert((symbol.to_string(), interval), bars);
        self
    }

    /// Queue a push `delay_ms` after the previous one.
    pub fn push_after(self, delay_ms: u64, bars: BarMap) -> Self {
        self.script
            .try_lock()
            .expect("script not shared yet")
            .push((Duration::from_millis(delay_ms), bars));
        self
    }

    pub async fn fetched(&self) -> Vec<(String, Interval)> {
        self.fetched.lock().await.clone()
    }

    pub fn cred_refreshes(&self) -> usize {
        self.cred_refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Streamer for StubStreamer {
    fn name(&self) -> &str {
        "stub"
    }

    fn intervals(&self) -> Vec<Interval> {
        self.intervals.clone()
    }

    fn fetch_interval(&self, interval: Interval) -> Interval {
        self.fetch.unwrap_or(interval)
    }

    async fn fetch_price_history(&self, symbol: &str, interval: Interval) -> Result<Vec<Bar>> {
        self.fetched.lock().await.push((symbol.to_string(), interval));
        Ok(self
            .history
            .get(&(symbol.to_string(), interval))
            .cloned()
            .unwrap_or_default())
    }

    async fn refresh_cred(&self) -> Result<()> {
        self.cred_refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self, _: Vec<String>, _: Interval, sink: BarSink, _: bool) -> Result<()> {
        let script = std::mem::take(&mut *self.script.lock().await);
        for (delay, bars) in script {
            tokio::time::sleep(delay).await;
            sink.push(bars)?;
        }
        Ok(())
    }
}

/// What a [`ScriptedAlgo`] does on each step.
#[derive(Debug, Clone)]
pub enum Behaviour {
    Idle,
    Buy(String, Decimal),
    /// Buy an option contract every step
    BuyOption(String, Decimal),
    /// Request an order, then return an error
    FailAfterOrder,
    /// Succeed until the n-th call (1-based), which requests an order and fails
    FailOnCall(usize),
    Panic,
}

/// One observed invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
    pub pending_orders: usize,
    pub synthesized: Vec<String>,
    pub closes: Vec<(String, Decimal)>,
}

#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<StdMutex<Vec<Call>>>);

impl Calls {
    pub fn count(&self) -> usize {
        self.0.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn all(&self) -> Vec<Call> {
        self.0.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

pub struct ScriptedAlgo {
    name: String,
    behaviour: Behaviour,
    config: AlgoConfig,
    calls: Calls,
}

impl ScriptedAlgo {
    pub fn new(name: &str, behaviour: Behaviour) -> (Self, Calls) {
        let calls = Calls::default();
        (
            Self {
                name: name.to_string(),
                behaviour,
                config: AlgoConfig::default(),
                calls: calls.clone(),
            },
            calls,
        )
    }

    pub fn with_config(mut self, config: AlgoConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl Algorithm for ScriptedAlgo {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> AlgoConfig {
        self.config.clone()
    }

    async fn main(&mut self, ctx: &mut AlgoContext<'_>) -> Result<()> {
        let call = Call {
            timestamp: ctx.timestamp(),
            equity: ctx.account().equity,
            pending_orders: ctx.pending_orders().len(),
            synthesized: ctx
                .watchlist()
                .iter()
                .filter(|s| ctx.is_synthesized(s))
                .cloned()
                .collect(),
            closes: ctx
                .watchlist()
                .iter()
                .filter_map(|s| ctx.price(s).map(|p| (s.clone(), p)))
                .collect(),
        };
        if let Ok(mut calls) = self.calls.0.lock() {
            calls.push(call);
        }
        let call_number = self.calls.count();

        match &self.behaviour {
            Behaviour::Idle => Ok(()),
            Behaviour::Buy(symbol, quantity) => {
                ctx.buy(symbol, *quantity);
                Ok(())
            }
            Behaviour::BuyOption(contract, quantity) => {
                ctx.buy_option(contract, *quantity);
                Ok(())
            }
            Behaviour::FailOnCall(n) if call_number == *n => {
                ctx.buy("SPY", dec!(1));
                bail!("strategy failed on call {}", n)
            }
            Behaviour::FailOnCall(_) => Ok(()),
            Behaviour::FailAfterOrder => {
                ctx.buy("SPY", dec!(1));
                bail!("strategy blew up")
            }
            Behaviour::Panic => panic!("strategy panicked"),
        }
    }
}
