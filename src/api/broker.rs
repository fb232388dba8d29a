//! Broker collaborator: account, positions, and order operations.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{Account, AssetClass, BarMap, Interval, Order, Position, TimeInForce};

#[async_trait]
pub trait Broker: Send + Sync {
    fn name(&self) -> &str;

    /// Called once the watch set and engine interval are known.
    async fn setup(&self, _watch: &[String], _interval: Interval) -> Result<()> {
        Ok(())
    }

    /// Receives every flushed batch before it is stored.
    async fn on_bars(&self, _bars: &BarMap) -> Result<()> {
        Ok(())
    }

    async fn fetch_account(&self) -> Result<Account>;

    /// Orders that have not been filled yet.
    async fn fetch_order_queue(&self) -> Result<Vec<Order>>;

    async fn fetch_stock_positions(&self) -> Result<Vec<Position>>;
    async fn fetch_option_positions(&self) -> Result<Vec<Position>>;
    async fn fetch_crypto_positions(&self) -> Result<Vec<Position>>;

    async fn fetch_stock_order_status(&self, id: &str) -> Result<Order>;
    async fn fetch_option_order_status(&self, id: &str) -> Result<Order>;
    async fn fetch_crypto_order_status(&self, id: &str) -> Result<Order>;

    /// Re-price option positions in place.
    async fn update_option_positions(&self, positions: &mut [Position]) -> Result<()>;

    async fn buy(
        &self,
        symbol: &str,
        quantity: Decimal,
        time_in_force: TimeInForce,
        extended: bool,
    ) -> Result<Order>;

    async fn sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        time_in_force: TimeInForce,
        extended: bool,
    ) -> Result<Order>;

    /// `contract` is the OCC option symbol.
    async fn buy_option(
        &self,
        contract: &str,
        quantity: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<Order>;

    async fn sell_option(
        &self,
        contract: &str,
        quantity: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<Order>;
}

/// Route a status query by instrument class.
pub async fn fetch_order_status(
    broker: &dyn Broker,
    asset_class: AssetClass,
    id: &str,
) -> Result<Order> {
    match asset_class {
        AssetClass::Stock => broker.fetch_stock_order_status(id).await,
        AssetClass::Option => broker.fetch_option_order_status(id).await,
        AssetClass::Crypto => broker.fetch_crypto_order_status(id).await,
    }
}
