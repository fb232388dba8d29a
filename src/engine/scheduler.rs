//! Runs due algorithms each cycle and retires the ones that fail.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::algo::{AlgoContext, AlgoSettings, Algorithm, OrderRequest};
use crate::error::StrategyError;
use crate::models::Order;
use crate::storage::Storage;

use super::cadence::CadenceGate;
use super::collector::FlushedBatch;
use super::portfolio::Portfolio;

/// An active algorithm and the settings resolved for it at startup.
pub struct AlgorithmHandle {
    pub name: String,
    pub settings: AlgoSettings,
    algo: Box<dyn Algorithm>,
}

impl AlgorithmHandle {
    pub fn new(algo: Box<dyn Algorithm>, settings: AlgoSettings) -> Self {
        Self {
            name: algo.name().to_string(),
            settings,
            algo,
        }
    }

    async fn step(
        &mut self,
        batch: &FlushedBatch,
        portfolio: &Portfolio,
        orders: &[Order],
        storage: &dyn Storage,
    ) -> Result<Vec<OrderRequest>, StrategyError> {
        let mut ctx = AlgoContext::new(&self.settings, batch, portfolio, orders, storage);

        let outcome = AssertUnwindSafe(self.algo.main(&mut ctx)).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => Ok(ctx.into_requests()),
            Ok(Err(e)) => Err(StrategyError::Failed(e)),
            Err(panic) => Err(StrategyError::Panicked(panic_message(&*panic))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Result of one scheduling pass.
#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    pub invoked: Vec<String>,
    pub deactivated: Vec<String>,
    /// Requests from successful steps, tagged with the requesting algorithm
    pub requests: Vec<(String, OrderRequest)>,
}

pub struct Scheduler {
    gate: CadenceGate,
    handles: Vec<AlgorithmHandle>,
}

impl Scheduler {
    pub fn new(gate: CadenceGate) -> Self {
        Self {
            gate,
            handles: Vec::new(),
        }
    }

    pub fn push(&mut self, handle: AlgorithmHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Names of the algorithms still active, in registration order.
    pub fn active(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.name.clone()).collect()
    }

    /// Invoke every algorithm due at the batch timestamp.
    pub async fn run_cycle(
        &mut self,
        batch: &FlushedBatch,
        portfolio: &Portfolio,
        orders: &[Order],
        storage: &dyn Storage,
    ) -> ScheduleOutcome {
        let mut outcome = ScheduleOutcome::default();
        let mut retained = Vec::with_capacity(self.handles.len());

        for mut handle in std::mem::take(&mut self.handles) {
            if !self.gate.is_due(batch.timestamp, handle.settings.interval) {
                retained.push(handle);
                continue;
            }

            debug!(algo = %handle.name, ts = %batch.timestamp, "Running algorithm");
            outcome.invoked.push(handle.name.clone());

            match handle.step(batch, portfolio, orders, storage).await {
                Ok(requests) => {
                    outcome
                        .requests
                        .extend(requests.into_iter().map(|r| (handle.name.clone(), r)));
                    retained.push(handle);
                }
                Err(e) => {
                    warn!(
                        algo = %handle.name,
                        error = %e,
                        "Algorithm failed, removing from algorithm list"
                    );
                    outcome.deactivated.push(handle.name);
                }
            }
        }

        self.handles = retained;
        outcome
    }
}
