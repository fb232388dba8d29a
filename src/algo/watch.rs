use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::{AlgoContext, Algorithm};

/// Logs the latest close of every watched symbol.
#[derive(Debug, Default)]
pub struct Watch;

#[async_trait]
impl Algorithm for Watch {
    fn name(&self) -> &str {
        "watch"
    }

    async fn main(&mut self, ctx: &mut AlgoContext<'_>) -> Result<()> {
        for symbol in ctx.watchlist() {
            if let Some(price) = ctx.price(symbol) {
                info!(
                    symbol = %symbol,
                    price = %price,
                    synthesized = ctx.is_synthesized(symbol),
                    ts = %ctx.timestamp(),
                    "Tick"
                );
            }
        }
        Ok(())
    }
}
