//! Moving-average crossover on stored history.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use super::{AlgoConfig, AlgoContext, AlgoSettings, Algorithm};
use crate::models::Interval;

/// Buys `quantity` when the fast SMA crosses above the slow one while flat,
/// and sells the whole holding on the cross back below.
#[derive(Debug, Clone)]
pub struct SmaCross {
    pub fast: usize,
    pub slow: usize,
    pub quantity: Decimal,
    pub interval: Option<Interval>,
    pub watchlist: Option<Vec<String>>,
}

impl Default for SmaCross {
    fn default() -> Self {
        Self {
            fast: 5,
            slow: 20,
            quantity: dec!(1),
            interval: None,
            watchlist: None,
        }
    }
}

fn sma(closes: &[Decimal], n: usize) -> Decimal {
    let window = &closes[closes.len() - n..];
    window.iter().copied().sum::<Decimal>() / Decimal::from(n as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cross {
    Up,
    Down,
}

/// Crossing between the second-to-last and last close, if any.
fn crossing(closes: &[Decimal], fast: usize, slow: usize) -> Option<Cross> {
    if closes.len() < slow + 1 {
        return None;
    }
    let prev = &closes[..closes.len() - 1];
    let (fast_prev, slow_prev) = (sma(prev, fast), sma(prev, slow));
    let (fast_now, slow_now) = (sma(closes, fast), sma(closes, slow));

    if fast_prev <= slow_prev && fast_now > slow_now {
        Some(Cross::Up)
    } else if fast_prev >= slow_prev && fast_now < slow_now {
        Some(Cross::Down)
    } else {
        None
    }
}

#[async_trait]
impl Algorithm for SmaCross {
    fn name(&self) -> &str {
        "sma-cross"
    }

    fn config(&self) -> AlgoConfig {
        AlgoConfig {
            interval: self.interval,
            watchlist: self.watchlist.clone(),
            aggregations: None,
        }
    }

    async fn setup(&mut self, settings: &AlgoSettings) -> Result<()> {
        if self.fast == 0 || self.fast >= self.slow {
            bail!("fast window {} must be positive and below slow window {}", self.fast, self.slow);
        }
        info!(
            fast = self.fast,
            slow = self.slow,
            interval = %settings.interval,
            symbols = settings.watchlist.len(),
            "SMA crossover ready"
        );
        Ok(())
    }

    async fn main(&mut self, ctx: &mut AlgoContext<'_>) -> Result<()> {
        for symbol in ctx.watchlist().to_vec() {
            if ctx.is_synthesized(&symbol) {
                debug!(symbol = %symbol, "Skipping carried-forward bar");
                continue;
            }
            if ctx.pending_orders().iter().any(|o| o.symbol == symbol) {
                continue;
            }

            let closes: Vec<Decimal> = ctx
                .history(&symbol, ctx.interval())
                .await?
                .iter()
                .map(|b| b.close)
                .collect();

            let held = ctx
                .position(&symbol)
                .map(|p| p.quantity)
                .unwrap_or(Decimal::ZERO);

            match crossing(&closes, self.fast, self.slow) {
                Some(Cross::Up) if held.is_zero() => {
                    info!(symbol = %symbol, quantity = %self.quantity, "Fast SMA crossed above, buying");
                    ctx.buy(&symbol, self.quantity);
                }
                Some(Cross::Down) if held > Decimal::ZERO => {
                    info!(symbol = %symbol, quantity = %held, "Fast SMA crossed below, selling");
                    ctx.sell(&symbol, held);
                }
                _ => {}
            }
        }
        Ok(())
    }
}
