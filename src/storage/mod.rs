//! Storage adapter: append-only bar history per (symbol, interval), plus the
//! transaction log and equity curve.
//!
//! Writes are last-write-wins per timestamp; ranges that don't overlap are
//! unioned. Both backends share the aggregation logic through the trait's
//! provided method.

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::engine::aggregator;
use crate::models::{Bar, EquityPoint, Interval, Transaction};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Merge `bars` into the (symbol, interval) series.
    async fn store(&self, symbol: &str, interval: Interval, bars: &[Bar]) -> Result<()>;

    /// Load a series in timestamp order. Without an interval, the finest
    /// interval stored for the symbol is returned.
    async fn load(&self, symbol: &str, interval: Option<Interval>) -> Result<Vec<Bar>>;

    /// Most recent bar of a series.
    async fn last_bar(&self, symbol: &str, interval: Interval) -> Result<Option<Bar>> {
        Ok(self.load(symbol, Some(interval)).await?.pop())
    }

    /// Bars of a series at or after `from`, in timestamp order.
    async fn load_since(
        &self,
        symbol: &str,
        interval: Interval,
        from: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let mut bars = self.load(symbol, Some(interval)).await?;
        bars.retain(|b| b.timestamp >= from);
        Ok(bars)
    }

    /// Rebuild the `target` buckets from the one containing `since` onward
    /// out of the stored `base` series, merging them into (symbol, target).
    async fn aggregate(
        &self,
        symbol: &str,
        base: Interval,
        target: Interval,
        since: DateTime<Utc>,
    ) -> Result<()> {
        let history = self
            .load_since(symbol, base, target.bucket_start(since))
            .await?;
        if history.is_empty() {
            return Ok(());
        }
        let bars = aggregator::resample(&history, target);
        self.store(symbol, target, &bars).await
    }

    async fn record_transaction(&self, tx: &Transaction) -> Result<()>;

    /// All transactions, oldest first.
    async fn transactions(&self) -> Result<Vec<Transaction>>;

    async fn record_equity(&self, point: &EquityPoint) -> Result<()>;

    /// Most recent `limit` equity points, oldest first.
    async fn equity_curve(&self, limit: usize) -> Result<Vec<EquityPoint>>;
}
