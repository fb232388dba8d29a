//! Locally cached account and positions, refreshed or marked each cycle.

use std::collections::BTreeSet;

use anyhow::Result;
use rust_decimal::Decimal;
use tracing::debug;

use crate::api::Broker;
use crate::models::{Account, BarMap, Position};

/// Which refresh path a cycle took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    /// Re-fetched from the broker after an order completed.
    Full,
    /// Re-priced locally from the cycle's closes.
    MarkToMarket,
}

#[derive(Debug, Clone, Default)]
pub struct Portfolio {
    pub account: Account,
    pub stocks: Vec<Position>,
    pub options: Vec<Position>,
    pub cryptos: Vec<Position>,
}

impl Portfolio {
    /// Fetch account and positions. With `watch`, positions in symbols
    /// outside the set are discarded.
    pub async fn fetch(broker: &dyn Broker, watch: Option<&BTreeSet<String>>) -> Result<Self> {
        let keep = |positions: Vec<Position>| -> Vec<Position> {
            match watch {
                Some(watch) => positions
                    .into_iter()
                    .filter(|p| watch.contains(&p.symbol))
                    .collect(),
                None => positions,
            }
        };

        let account = broker.fetch_account().await?;
        let stocks = keep(broker.fetch_stock_positions().await?);
        let options = keep(broker.fetch_option_positions().await?);
        let cryptos = keep(broker.fetch_crypto_positions().await?);

        Ok(Self {
            account,
            stocks,
            options,
            cryptos,
        })
    }

    /// Run this cycle's refresh.
    ///
    /// Options are always re-priced by the broker. After a full refresh the
    /// broker's equity is kept as reported; otherwise equity is recomputed as
    /// cash plus every position's market value.
    pub async fn update(
        &mut self,
        broker: &dyn Broker,
        bars: &BarMap,
        order_completed: bool,
        watch: &BTreeSet<String>,
    ) -> Result<RefreshKind> {
        let kind = if order_completed {
            *self = Self::fetch(broker, Some(watch)).await?;
            RefreshKind::Full
        } else {
            RefreshKind::MarkToMarket
        };

        broker.update_option_positions(&mut self.options).await?;

        if kind == RefreshKind::MarkToMarket {
            self.mark_to_market(bars);
            self.account.equity = self.account.cash + self.market_value();
        }

        debug!(
            kind = ?kind,
            cash = %self.account.cash,
            equity = %self.account.equity,
            "Portfolio updated"
        );
        Ok(kind)
    }

    /// Re-price stock and crypto positions at this cycle's closes.
    pub fn mark_to_market(&mut self, bars: &BarMap) {
        for pos in self.stocks.iter_mut().chain(self.cryptos.iter_mut()) {
            if let Some(bar) = bars.get(&pos.symbol) {
                pos.update_price(bar.close);
            }
        }
    }

    pub fn market_value(&self) -> Decimal {
        self.all().map(|p| p.market_value).sum()
    }

    /// Stock or crypto position in `symbol`.
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.stocks
            .iter()
            .chain(self.cryptos.iter())
            .find(|p| p.symbol == symbol)
    }

    pub fn all(&self) -> impl Iterator<Item = &Position> {
        self.stocks
            .iter()
            .chain(self.options.iter())
            .chain(self.cryptos.iter())
    }

    /// Symbols with an open position, options mapped to their underlying.
    pub fn symbols(&self) -> BTreeSet<String> {
        self.all().map(|p| p.symbol.clone()).collect()
    }
}
