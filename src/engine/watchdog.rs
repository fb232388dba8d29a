//! Period deadline and degraded-batch synthesis.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::models::Interval;
use crate::storage::Storage;

use super::collector::{FlushReason, FlushedBatch, PartialBatch};

/// Fires a callback once per armed period after a fixed deadline.
#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    deadline: Duration,
}

impl Watchdog {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Spawn the timer for `period`. The callback must itself check that the
    /// period is still outstanding.
    pub fn arm<F, Fut>(&self, period: u64, on_expiry: F) -> JoinHandle<()>
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let deadline = self.deadline;
        tokio::spawn(async move {
            debug!(period, deadline_ms = deadline.as_millis() as u64, "Deadline armed");
            tokio::time::sleep(deadline).await;
            on_expiry(period).await;
        })
    }
}

/// Complete a partial batch with carried-forward bars.
///
/// Each missing symbol gets its most recent stored bar at `interval`,
/// restamped to the batch timestamp. A symbol with no stored history is left
/// out of the batch.
pub async fn fill_missing(
    partial: PartialBatch,
    storage: &dyn Storage,
    interval: Interval,
) -> EngineResult<FlushedBatch> {
    let PartialBatch {
        period,
        mut bars,
        missing,
    } = partial;

    let timestamp = super::collector::latest_timestamp(&bars).unwrap_or_else(chrono::Utc::now);
    let mut synthesized = std::collections::BTreeSet::new();

    for symbol in missing {
        match storage.last_bar(&symbol, interval).await? {
            Some(last) => {
                debug!(symbol = %symbol, from = %last.timestamp, "Carrying bar forward");
                bars.insert(symbol.clone(), last.restamped(timestamp));
                synthesized.insert(symbol);
            }
            None => {
                warn!(symbol = %symbol, "No stored history to synthesize from, omitting");
            }
        }
    }

    Ok(FlushedBatch {
        period,
        timestamp,
        bars,
        synthesized,
        reason: FlushReason::TimedOut,
    })
}
