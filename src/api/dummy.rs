//! Simulated streamer producing random-walk bars on a simulated clock.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::SimulationConfig;
use crate::engine::aggregator::resample;
use crate::models::{Bar, BarMap, Interval};

use super::{BarSink, Streamer};

/// Largest per-minute relative move.
const STEP: f64 = 0.002;

struct DummyState {
    rng: StdRng,
    prices: HashMap<String, f64>,
    /// Start of the next bar to emit
    clock: DateTime<Utc>,
}

impl DummyState {
    fn price(&mut self, symbol: &str) -> f64 {
        *self
            .prices
            .entry(symbol.to_string())
            .or_insert_with(|| seed_price(symbol))
    }
}

/// Deterministic starting price in [20, 500) derived from the symbol.
fn seed_price(symbol: &str) -> f64 {
    let sum: u32 = symbol.bytes().map(u32::from).sum();
    20.0 + f64::from(sum % 480)
}

fn to_decimal(x: f64) -> Decimal {
    Decimal::from_f64(x).unwrap_or_default().round_dp(2)
}

fn make_bar(rng: &mut StdRng, ts: DateTime<Utc>, open: f64, close: f64) -> Bar {
    let wick = 1.0 + rng.gen_range(0.0..STEP / 2.0);
    let volume: u32 = rng.gen_range(100..10_000);
    Bar::new(
        ts,
        to_decimal(open),
        to_decimal(open.max(close) * wick),
        to_decimal(open.min(close) / wick),
        to_decimal(close),
        Decimal::from(volume),
    )
}

pub struct DummyStreamer {
    tick: StdDuration,
    dropout: f64,
    history_minutes: u32,
    state: Mutex<DummyState>,
}

impl DummyStreamer {
    pub fn new(config: &SimulationConfig, seed: u64) -> Self {
        Self::with_clock(config, seed, Interval::Min1.bucket_start(Utc::now()))
    }

    /// Start the simulated clock at `start`.
    pub fn with_clock(config: &SimulationConfig, seed: u64, start: DateTime<Utc>) -> Self {
        Self {
            tick: StdDuration::from_millis(config.tick_ms.max(1)),
            dropout: config.dropout.clamp(0.0, 1.0),
            history_minutes: config.history_minutes,
            state: Mutex::new(DummyState {
                rng: StdRng::seed_from_u64(seed),
                prices: HashMap::new(),
                clock: start,
            }),
        }
    }
}

#[async_trait]
impl Streamer for DummyStreamer {
    fn name(&self) -> &str {
        "dummy"
    }

    fn intervals(&self) -> Vec<Interval> {
        Interval::ALL.to_vec()
    }

    /// Everything is simulated at 1MIN and aggregated upward.
    fn fetch_interval(&self, _interval: Interval) -> Interval {
        Interval::Min1
    }

    async fn fetch_price_history(&self, symbol: &str, interval: Interval) -> Result<Vec<Bar>> {
        let mut state = self.state.lock().await;
        let current = state.price(symbol);
        let end = state.clock;
        let count = self.history_minutes as usize;

        // walk backwards so the last historical close meets the live price
        let mut closes = Vec::with_capacity(count + 1);
        closes.push(current);
        for _ in 0..count {
            let prev = closes[closes.len() - 1];
            closes.push(prev / (1.0 + state.rng.gen_range(-STEP..STEP)));
        }
        closes.reverse();

        let mut bars = Vec::with_capacity(count);
        for (i, pair) in closes.windows(2).enumerate() {
            let ts = end - Duration::minutes((count - i) as i64);
            bars.push(make_bar(&mut state.rng, ts, pair[0], pair[1]));
        }

        debug!(symbol = %symbol, bars = bars.len(), interval = %interval, "Generated history");

        if interval == Interval::Min1 {
            Ok(bars)
        } else {
            Ok(resample(&bars, interval))
        }
    }

    async fn start(
        &self,
        watch: Vec<String>,
        interval: Interval,
        sink: BarSink,
        kill_switch: bool,
    ) -> Result<()> {
        info!(
            symbols = watch.len(),
            interval = %interval,
            tick_ms = self.tick.as_millis() as u64,
            "Dummy streamer started"
        );

        let mut ticker = tokio::time::interval(self.tick);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let fragments = {
                let mut state = self.state.lock().await;
                let ts = state.clock;
                state.clock = ts + interval.duration();

                let mut fragments = Vec::with_capacity(watch.len());
                for symbol in &watch {
                    let open = state.price(symbol);
                    let close = open * (1.0 + state.rng.gen_range(-STEP..STEP));
                    state.prices.insert(symbol.clone(), close);

                    if state.rng.gen_bool(self.dropout) {
                        debug!(symbol = %symbol, ts = %ts, "Withholding bar");
                        continue;
                    }
                    let bar = make_bar(&mut state.rng, ts, open, close);
                    fragments.push(BarMap::from([(symbol.clone(), bar)]));
                }
                fragments.shuffle(&mut state.rng);
                fragments
            };

            for fragment in fragments {
                sink.push(fragment)?;
            }

            if kill_switch {
                debug!("Kill switch set, stopping after one period");
                return Ok(());
            }
        }
    }
}
