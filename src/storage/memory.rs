//! In-process storage backend.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::Storage;
use crate::models::{Bar, EquityPoint, Interval, Transaction};

type Series = BTreeMap<DateTime<Utc>, Bar>;

/// Keeps everything in memory; lost on exit.
#[derive(Default)]
pub struct MemoryStorage {
    bars: RwLock<HashMap<String, BTreeMap<Interval, Series>>>,
    transactions: RwLock<Vec<Transaction>>,
    equity: RwLock<Vec<EquityPoint>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn store(&self, symbol: &str, interval: Interval, bars: &[Bar]) -> Result<()> {
        let mut all = self.bars.write().await;
        let series = all
            .entry(symbol.to_string())
            .or_default()
            .entry(interval)
            .or_default();
        for bar in bars {
            series.insert(bar.timestamp, bar.clone());
        }
        Ok(())
    }

    async fn load(&self, symbol: &str, interval: Option<Interval>) -> Result<Vec<Bar>> {
        let all = self.bars.read().await;
        let Some(by_interval) = all.get(symbol) else {
            return Ok(Vec::new());
        };

        // BTreeMap keys are ordered finest first
        let series = match interval {
            Some(i) => by_interval.get(&i),
            None => by_interval.values().next(),
        };

        Ok(series
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn load_since(
        &self,
        symbol: &str,
        interval: Interval,
        from: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let all = self.bars.read().await;
        Ok(all
            .get(symbol)
            .and_then(|by_interval| by_interval.get(&interval))
            .map(|series| series.range(from..).map(|(_, b)| b.clone()).collect())
            .unwrap_or_default())
    }

    async fn record_transaction(&self, tx: &Transaction) -> Result<()> {
        self.transactions.write().await.push(tx.clone());
        Ok(())
    }

    async fn transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self.transactions.read().await.clone())
    }

    async fn record_equity(&self, point: &EquityPoint) -> Result<()> {
        self.equity.write().await.push(point.clone());
        Ok(())
    }

    async fn equity_curve(&self, limit: usize) -> Result<Vec<EquityPoint>> {
        let equity = self.equity.read().await;
        let skip = equity.len().saturating_sub(limit);
        Ok(equity[skip..].to_vec())
    }
}
