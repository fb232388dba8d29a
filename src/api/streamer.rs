//! Streaming collaborator: price history and live bar pushes.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{Bar, BarMap, Interval};

/// Where a streamer delivers live bars.
#[derive(Debug, Clone)]
pub struct BarSink {
    tx: mpsc::UnboundedSender<BarMap>,
}

impl BarSink {
    pub fn new(tx: mpsc::UnboundedSender<BarMap>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BarMap>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn push(&self, bars: BarMap) -> Result<()> {
        self.tx
            .send(bars)
            .map_err(|_| anyhow!("Bar sink closed; trader is no longer receiving"))
    }
}

#[async_trait]
pub trait Streamer: Send + Sync {
    fn name(&self) -> &str;

    /// Intervals this streamer can drive a trader at.
    fn intervals(&self) -> Vec<Interval>;

    fn has_interval(&self, interval: Interval) -> bool {
        self.intervals().contains(&interval)
    }

    /// Base interval actually streamed when `interval` is requested.
    fn fetch_interval(&self, interval: Interval) -> Interval {
        interval
    }

    async fn fetch_price_history(&self, symbol: &str, interval: Interval) -> Result<Vec<Bar>>;

    /// Rotate access tokens.
    async fn refresh_cred(&self) -> Result<()> {
        Ok(())
    }

    /// Push bars for `watch` into `sink` until the stream ends. With
    /// `kill_switch` set, a single period is emitted and the call returns.
    async fn start(
        &self,
        watch: Vec<String>,
        interval: Interval,
        sink: BarSink,
        kill_switch: bool,
    ) -> Result<()>;
}
