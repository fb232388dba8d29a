//! What an algorithm sees and asks for during one decision step.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::engine::{FlushedBatch, Portfolio};
use crate::models::{Account, AssetClass, Bar, Interval, Order, OrderSide, Position, TimeInForce};
use crate::storage::Storage;

use super::AlgoSettings;

/// An order an algorithm wants placed once its step succeeds.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderRequest {
    Equity {
        side: OrderSide,
        symbol: String,
        quantity: Decimal,
        time_in_force: TimeInForce,
        extended: bool,
    },
    Option {
        side: OrderSide,
        contract: String,
        quantity: Decimal,
        time_in_force: TimeInForce,
    },
}

impl OrderRequest {
    pub fn side(&self) -> OrderSide {
        match self {
            OrderRequest::Equity { side, .. } | OrderRequest::Option { side, .. } => *side,
        }
    }

    /// Ticker for equities, OCC contract for options.
    pub fn symbol(&self) -> &str {
        match self {
            OrderRequest::Equity { symbol, .. } => symbol,
            OrderRequest::Option { contract, .. } => contract,
        }
    }

    pub fn quantity(&self) -> Decimal {
        match self {
            OrderRequest::Equity { quantity, .. } | OrderRequest::Option { quantity, .. } => {
                *quantity
            }
        }
    }

    pub fn asset_class(&self) -> AssetClass {
        match self {
            OrderRequest::Equity { symbol, .. } => AssetClass::of_symbol(symbol),
            OrderRequest::Option { .. } => AssetClass::Option,
        }
    }
}

pub struct AlgoContext<'a> {
    settings: &'a AlgoSettings,
    batch: &'a FlushedBatch,
    portfolio: &'a Portfolio,
    orders: &'a [Order],
    storage: &'a dyn Storage,
    requests: Vec<OrderRequest>,
}

impl<'a> AlgoContext<'a> {
    pub fn new(
        settings: &'a AlgoSettings,
        batch: &'a FlushedBatch,
        portfolio: &'a Portfolio,
        orders: &'a [Order],
        storage: &'a dyn Storage,
    ) -> Self {
        Self {
            settings,
            batch,
            portfolio,
            orders,
            storage,
            requests: Vec::new(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.batch.timestamp
    }

    pub fn interval(&self) -> Interval {
        self.settings.interval
    }

    pub fn watchlist(&self) -> &[String] {
        &self.settings.watchlist
    }

    pub fn bar(&self, symbol: &str) -> Option<&Bar> {
        self.batch.bar(symbol)
    }

    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.batch.close(symbol)
    }

    /// True when this cycle's bar for `symbol` was carried forward.
    pub fn is_synthesized(&self, symbol: &str) -> bool {
        self.batch.synthesized.contains(symbol)
    }

    pub fn account(&self) -> &Account {
        &self.portfolio.account
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.portfolio.position(symbol)
    }

    pub fn option_positions(&self) -> &[Position] {
        &self.portfolio.options
    }

    pub fn pending_orders(&self) -> &[Order] {
        self.orders
    }

    /// Stored history for `symbol`, oldest first.
    pub async fn history(&self, symbol: &str, interval: Interval) -> Result<Vec<Bar>> {
        self.storage.load(symbol, Some(interval)).await
    }

    pub fn buy(&mut self, symbol: &str, quantity: Decimal) {
        self.submit(OrderRequest::Equity {
            side: OrderSide::Buy,
            symbol: symbol.to_string(),
            quantity,
            time_in_force: TimeInForce::Gtc,
            extended: false,
        });
    }

    pub fn sell(&mut self, symbol: &str, quantity: Decimal) {
        self.submit(OrderRequest::Equity {
            side: OrderSide::Sell,
            symbol: symbol.to_string(),
            quantity,
            time_in_force: TimeInForce::Gtc,
            extended: false,
        });
    }

    pub fn buy_option(&mut self, contract: &str, quantity: Decimal) {
        self.submit(OrderRequest::Option {
            side: OrderSide::Buy,
            contract: contract.to_string(),
            quantity,
            time_in_force: TimeInForce::Gtc,
        });
    }

    pub fn sell_option(&mut self, contract: &str, quantity: Decimal) {
        self.submit(OrderRequest::Option {
            side: OrderSide::Sell,
            contract: contract.to_string(),
            quantity,
            time_in_force: TimeInForce::Gtc,
        });
    }

    pub fn submit(&mut self, request: OrderRequest) {
        self.requests.push(request);
    }

    pub fn into_requests(self) -> Vec<OrderRequest> {
        self.requests
    }
}
