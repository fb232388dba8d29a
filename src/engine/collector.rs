//! Gathers per-symbol bar fragments into one batch per period.
//!
//! Every period carries an id. Flushing, whether on completion or on timeout,
//! advances the id, so at most one flush ever happens per period.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use crate::models::{Bar, BarMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Every watched symbol reported.
    Complete,
    /// The deadline passed with symbols still missing.
    TimedOut,
}

/// One period's worth of bars, ready for the cycle pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushedBatch {
    pub period: u64,
    /// Latest timestamp among the fresh bars
    pub timestamp: DateTime<Utc>,
    pub bars: BarMap,
    /// Symbols whose bar was carried forward from storage
    pub synthesized: BTreeSet<String>,
    pub reason: FlushReason,
}

impl FlushedBatch {
    pub fn bar(&self, symbol: &str) -> Option<&Bar> {
        self.bars.get(symbol)
    }

    pub fn close(&self, symbol: &str) -> Option<Decimal> {
        self.bars.get(symbol).map(|b| b.close)
    }

    pub fn fresh_count(&self) -> usize {
        self.bars.len() - self.synthesized.len()
    }
}

/// Bars collected for a period that ran out of time.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialBatch {
    pub period: u64,
    pub bars: BarMap,
    pub missing: BTreeSet<String>,
}

/// Outcome of handing a push to the collector.
#[derive(Debug, Clone, PartialEq)]
pub enum Arrival {
    /// First fragment of a new period; arm the deadline for this id.
    Started(u64),
    /// More fragments of a period already under way.
    Collecting,
    /// The period is complete.
    Complete(FlushedBatch),
    /// Nothing in the push belonged to the watch set.
    Ignored,
}

pub(crate) fn latest_timestamp(bars: &BarMap) -> Option<DateTime<Utc>> {
    bars.values().map(|b| b.timestamp).max()
}

#[derive(Debug)]
pub struct BarCollector {
    watch: BTreeSet<String>,
    needed: BTreeSet<String>,
    pending: BarMap,
    period: u64,
}

impl BarCollector {
    pub fn new<I, S>(watch: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let watch: BTreeSet<String> = watch.into_iter().map(Into::into).collect();
        Self {
            needed: watch.clone(),
            watch,
            pending: BarMap::new(),
            period: 0,
        }
    }

    /// Id of the period currently being collected.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Symbols still outstanding for the current period.
    pub fn needed(&self) -> &BTreeSet<String> {
        &self.needed
    }

    pub fn is_collecting(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn receive(&mut self, bars: BarMap) -> Arrival {
        let first = self.pending.is_empty();
        let mut accepted = false;

        for (symbol, bar) in bars {
            if !self.watch.contains(&symbol) {
                warn!(symbol = %symbol, "Dropping bar for symbol outside the watch set");
                continue;
            }
            // a repeat within the period replaces the earlier bar
            self.needed.remove(&symbol);
            self.pending.insert(symbol, bar);
            accepted = true;
        }

        if !accepted {
            return Arrival::Ignored;
        }

        if self.needed.is_empty() {
            let period = self.period;
            let bars = self.reset();
            let timestamp = latest_timestamp(&bars).unwrap_or_else(Utc::now);
            return Arrival::Complete(FlushedBatch {
                period,
                timestamp,
                bars,
                synthesized: BTreeSet::new(),
                reason: FlushReason::Complete,
            });
        }

        if first {
            Arrival::Started(self.period)
        } else {
            Arrival::Collecting
        }
    }

    /// Take what has arrived for `period` if it is still outstanding.
    ///
    /// Returns `None` when the period already flushed.
    pub fn take_timed_out(&mut self, period: u64) -> Option<PartialBatch> {
        if period != self.period || self.pending.is_empty() {
            return None;
        }

        let missing = self.needed.clone();
        let bars = self.reset();
        Some(PartialBatch {
            period,
            bars,
            missing,
        })
    }

    fn reset(&mut self) -> BarMap {
        self.period += 1;
        self.needed = self.watch.clone();
        std::mem::take(&mut self.pending)
    }
}
