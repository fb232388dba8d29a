//! User strategies and the bundled ones.

mod context;
mod sma_cross;
mod watch;

pub use context::{AlgoContext, OrderRequest};
pub use sma_cross::SmaCross;
pub use watch::Watch;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Interval;

/// Per-algorithm overrides. Unset fields inherit the trader's settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlgoConfig {
    pub interval: Option<Interval>,
    pub watchlist: Option<Vec<String>>,
    pub aggregations: Option<Vec<Interval>>,
}

/// Settings an algorithm runs with once startup has resolved them.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgoSettings {
    pub interval: Interval,
    pub watchlist: Vec<String>,
    pub aggregations: Vec<Interval>,
}

#[async_trait]
pub trait Algorithm: Send {
    fn name(&self) -> &str;

    fn config(&self) -> AlgoConfig {
        AlgoConfig::default()
    }

    async fn setup(&mut self, _settings: &AlgoSettings) -> Result<()> {
        Ok(())
    }

    /// One decision step. An error or panic removes the algorithm from the
    /// run and discards the orders it requested in this step.
    async fn main(&mut self, ctx: &mut AlgoContext<'_>) -> Result<()>;
}

/// Look up a bundled algorithm by its CLI name.
pub fn bundled(name: &str) -> Option<Box<dyn Algorithm>> {
    match name {
        "watch" => Some(Box::new(Watch::default())),
        "sma-cross" | "sma_cross" => Some(Box::new(SmaCross::default())),
        _ => None,
    }
}

pub const BUNDLED: &[&str] = &["watch", "sma-cross"];
