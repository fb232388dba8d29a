//! In-process paper broker.
//!
//! Orders are accepted as pending and fill on the next status query at the
//! last close seen through [`Broker::on_bars`]. Option orders need a quote
//! set with [`PaperBroker::set_option_quote`].

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    Account, AssetClass, BarMap, Order, OrderSide, OrderStatus, Position, TimeInForce,
    OPTION_MULTIPLIER,
};

use super::Broker;

#[derive(Debug, Default)]
struct PaperState {
    cash: Decimal,
    /// Keyed by symbol for stock/crypto, by contract for options
    positions: HashMap<String, Position>,
    orders: HashMap<String, Order>,
    prices: HashMap<String, Decimal>,
    option_quotes: HashMap<String, Decimal>,
    clock: Option<DateTime<Utc>>,
}

impl PaperState {
    fn price_of(&self, asset_class: AssetClass, symbol: &str) -> Option<Decimal> {
        match asset_class {
            AssetClass::Option => self.option_quotes.get(symbol).copied(),
            _ => self.prices.get(symbol).copied(),
        }
    }

    fn holdings_value(&self) -> Decimal {
        self.positions.values().map(|p| p.market_value).sum()
    }

    fn held(&self, key: &str) -> Decimal {
        self.positions
            .get(key)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    fn open_order(
        &mut self,
        asset_class: AssetClass,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<Order> {
        if quantity <= Decimal::ZERO {
            bail!("Order quantity must be positive, got {}", quantity);
        }

        let price = self
            .price_of(asset_class, symbol)
            .ok_or_else(|| anyhow!("No price available for {}", symbol))?;
        let multiplier = multiplier_for(asset_class);

        match side {
            OrderSide::Buy => {
                let cost = price * quantity * multiplier;
                if cost > self.cash {
                    bail!(
                        "Insufficient buying power for {} x {}: need {}, have {}",
                        quantity,
                        symbol,
                        cost,
                        self.cash
                    );
                }
            }
            OrderSide::Sell => {
                let held = self.held(symbol);
                if quantity > held {
                    bail!(
                        "Cannot sell {} x {}: only {} held",
                        quantity,
                        symbol,
                        held
                    );
                }
            }
        }

        let order = Order {
            id: Uuid::new_v4().to_string(),
            asset_class: Some(asset_class),
            symbol: symbol.to_string(),
            side,
            quantity,
            time_in_force,
            status: OrderStatus::Pending,
            filled_price: None,
            submitted_at: self.now(),
        };

        debug!(
            id = %order.id,
            symbol = %symbol,
            side = side.as_str(),
            quantity = %quantity,
            "Paper order accepted"
        );

        self.orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    /// Fill a pending order at the current price.
    fn try_fill(&mut self, id: &str) -> Result<Order> {
        let order = self
            .orders
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown order id {}", id))?;

        if order.status != OrderStatus::Pending {
            return Ok(order);
        }

        let asset_class = order.asset_class.unwrap_or(AssetClass::Stock);
        let Some(price) = self.price_of(asset_class, &order.symbol) else {
            return Ok(order);
        };
        let multiplier = multiplier_for(asset_class);
        let notional = price * order.quantity * multiplier;

        let status = match order.side {
            OrderSide::Buy if notional > self.cash => OrderStatus::Cancelled,
            OrderSide::Sell if order.quantity > self.held(&order.symbol) => OrderStatus::Cancelled,
            OrderSide::Buy => {
                self.cash -= notional;
                match self.positions.get_mut(&order.symbol) {
                    Some(pos) => pos.add(order.quantity, price),
                    None => {
                        let pos = match asset_class {
                            AssetClass::Option => Position::option(
                                occ_underlying(&order.symbol),
                                order.symbol.clone(),
                                order.quantity,
                                price,
                            ),
                            _ => Position::new(order.symbol.clone(), order.quantity, price),
                        };
                        self.positions.insert(order.symbol.clone(), pos);
                    }
                }
                OrderStatus::Filled
            }
            OrderSide::Sell => {
                self.cash += notional;
                if let Some(pos) = self.positions.get_mut(&order.symbol) {
                    pos.reduce(order.quantity, price);
                    if pos.is_closed() {
                        self.positions.remove(&order.symbol);
                    }
                }
                OrderStatus::Filled
            }
        };

        let updated = Order {
            status,
            filled_price: (status == OrderStatus::Filled).then_some(price),
            ..order
        };

        match status {
            OrderStatus::Filled => info!(
                id = %updated.id,
                symbol = %updated.symbol,
                side = updated.side.as_str(),
                price = %price,
                "Paper order filled"
            ),
            _ => warn!(id = %updated.id, symbol = %updated.symbol, "Paper order cancelled"),
        }

        self.orders.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    fn status_of(&mut self, id: &str, expected: AssetClass) -> Result<Order> {
        let class = self.orders.get(id).and_then(|o| o.asset_class);
        if class != Some(expected) {
            bail!("Order {} is not a {} order", id, expected.as_str());
        }
        self.try_fill(id)
    }

    fn positions_of(&self, asset_class: AssetClass) -> Vec<Position> {
        let mut out: Vec<Position> = self
            .positions
            .values()
            .filter(|p| p.asset_class == asset_class)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }
}

fn multiplier_for(asset_class: AssetClass) -> Decimal {
    match asset_class {
        AssetClass::Option => OPTION_MULTIPLIER,
        _ => Decimal::ONE,
    }
}

/// Root symbol of an OCC contract, e.g. `SPY` for `SPY240119C00400000`.
pub fn occ_underlying(contract: &str) -> String {
    contract
        .chars()
        .take_while(|c| !c.is_ascii_digit())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Simulated broker holding cash, positions, and orders in memory.
pub struct PaperBroker {
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            state: Mutex::new(PaperState {
                cash: starting_cash,
                ..Default::default()
            }),
        }
    }

    /// Set the premium used to fill and mark `contract`.
    pub async fn set_option_quote(&self, contract: &str, premium: Decimal) {
        self.state
            .lock()
            .await
            .option_quotes
            .insert(contract.to_string(), premium);
    }

    async fn submit(
        &self,
        asset_class: AssetClass,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<Order> {
        self.state
            .lock()
            .await
            .open_order(asset_class, symbol, side, quantity, time_in_force)
    }
}

#[async_trait]
impl Broker for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    async fn on_bars(&self, bars: &BarMap) -> Result<()> {
        let mut state = self.state.lock().await;

        for (symbol, bar) in bars {
            state.prices.insert(symbol.clone(), bar.close);
            state.clock = Some(state.clock.map_or(bar.timestamp, |c| c.max(bar.timestamp)));
        }

        let prices = state.prices.clone();
        for pos in state.positions.values_mut() {
            if pos.asset_class != AssetClass::Option {
                if let Some(price) = prices.get(&pos.symbol) {
                    pos.update_price(*price);
                }
            }
        }

        Ok(())
    }

    async fn fetch_account(&self) -> Result<Account> {
        let state = self.state.lock().await;
        Ok(Account {
            cash: state.cash,
            equity: state.cash + state.holdings_value(),
            buying_power: state.cash,
        })
    }

    async fn fetch_order_queue(&self) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut queue: Vec<Order> = state
            .orders
            .values()
            .filter(|o| !o.is_filled())
            .cloned()
            .collect();
        queue.sort_by_key(|o| o.submitted_at);
        Ok(queue)
    }

    async fn fetch_stock_positions(&self) -> Result<Vec<Position>> {
        Ok(self.state.lock().await.positions_of(AssetClass::Stock))
    }

    async fn fetch_option_positions(&self) -> Result<Vec<Position>> {
        Ok(self.state.lock().await.positions_of(AssetClass::Option))
    }

    async fn fetch_crypto_positions(&self) -> Result<Vec<Position>> {
        Ok(self.state.lock().await.positions_of(AssetClass::Crypto))
    }

    async fn fetch_stock_order_status(&self, id: &str) -> Result<Order> {
        self.state.lock().await.status_of(id, AssetClass::Stock)
    }

    async fn fetch_option_order_status(&self, id: &str) -> Result<Order> {
        self.state.lock().await.status_of(id, AssetClass::Option)
    }

    async fn fetch_crypto_order_status(&self, id: &str) -> Result<Order> {
        self.state.lock().await.status_of(id, AssetClass::Crypto)
    }

    async fn update_option_positions(&self, positions: &mut [Position]) -> Result<()> {
        let mut state = self.state.lock().await;

        for pos in positions.iter_mut() {
            let Some(contract) = pos.contract.clone() else {
                continue;
            };
            if let Some(premium) = state.option_quotes.get(&contract).copied() {
                pos.update_price(premium);
                if let Some(held) = state.positions.get_mut(&contract) {
                    held.update_price(premium);
                }
            }
        }

        Ok(())
    }

    async fn buy(
        &self,
        symbol: &str,
        quantity: Decimal,
        time_in_force: TimeInForce,
        _extended: bool,
    ) -> Result<Order> {
        self.submit(
            AssetClass::of_symbol(symbol),
            symbol,
            OrderSide::Buy,
            quantity,
            time_in_force,
        )
        .await
    }

    async fn sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        time_in_force: TimeInForce,
        _extended: bool,
    ) -> Result<Order> {
        self.submit(
            AssetClass::of_symbol(symbol),
            symbol,
            OrderSide::Sell,
            quantity,
            time_in_force,
        )
        .await
    }

    async fn buy_option(
        &self,
        contract: &str,
        quantity: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<Order> {
        self.submit(
            AssetClass::Option,
            contract,
            OrderSide::Buy,
            quantity,
            time_in_force,
        )
        .await
    }

    async fn sell_option(
        &self,
        contract: &str,
        quantity: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<Order> {
        self.submit(
            AssetClass::Option,
            contract,
            OrderSide::Sell,
            quantity,
            time_in_force,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bar;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bars(symbol: &str, close: Decimal) -> BarMap {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
        BarMap::from([(
            symbol.to_string(),
            Bar::new(ts, close, close, close, close, dec!(100)),
        )])
    }

    #[tokio::test]
    async fn test_order_fills_on_status_query() {
        let broker = PaperBroker::new(dec!(1000));
        broker.on_bars(&bars("SPY", dec!(100))).await.unwrap();

        let order = broker.buy("SPY", dec!(2), TimeInForce::Gtc, false).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(broker.fetch_order_queue().await.unwrap().len(), 1);

        broker.on_bars(&bars("SPY", dec!(110))).await.unwrap();
        let filled = broker.fetch_stock_order_status(&order.id).await.unwrap();
        assert!(filled.is_filled());
        assert_eq!(filled.filled_price, Some(dec!(110)));

        let account = broker.fetch_account().await.unwrap();
        assert_eq!(account.cash, dec!(780));
        assert_eq!(account.equity, dec!(1000));
        assert!(broker.fetch_order_queue().await.unwrap().is_empty());

        let positions = broker.fetch_stock_positions().await.unwrap();
        assert_eq!(positions[0].quantity, dec!(2));
    }

    #[tokio::test]
    async fn test_rejects_without_price_or_cash() {
        let broker = PaperBroker::new(dec!(100));
        assert!(broker.buy("QQQ", dec!(1), TimeInForce::Gtc, false).await.is_err());

        broker.on_bars(&bars("QQQ", dec!(400))).await.unwrap();
        assert!(broker.buy("QQQ", dec!(1), TimeInForce::Gtc, false).await.is_err());
        assert!(broker.sell("QQQ", dec!(1), TimeInForce::Gtc, false).await.is_err());
    }

    #[tokio::test]
    async fn test_status_query_checks_class() {
        let broker = PaperBroker::new(dec!(1000));
        broker.on_bars(&bars("@BTC", dec!(10))).await.unwrap();

        let order = broker.buy("@BTC", dec!(1), TimeInForce::Gtc, false).await.unwrap();
        assert_eq!(order.asset_class, Some(AssetClass::Crypto));
        assert!(broker.fetch_stock_order_status(&order.id).await.is_err());
        assert!(broker.fetch_crypto_order_status(&order.id).await.unwrap().is_filled());
    }

    #[tokio::test]
    async fn test_option_round_trip() {
        let broker = PaperBroker::new(dec!(1000));
        let contract = "SPY240119C00400000";
        assert!(broker.buy_option(contract, dec!(1), TimeInForce::Gtc).await.is_err());

        broker.set_option_quote(contract, dec!(2.5)).await;
        let order = broker.buy_option(contract, dec!(1), TimeInForce::Gtc).await.unwrap();
        broker.fetch_option_order_status(&order.id).await.unwrap();

        let mut options = broker.fetch_option_positions().await.unwrap();
        assert_eq!(options[0].symbol, "SPY");
        assert_eq!(options[0].market_value, dec!(250));

        broker.set_option_quote(contract, dec!(3)).await;
        broker.update_option_positions(&mut options).await.unwrap();
        assert_eq!(options[0].market_value, dec!(300));
        assert_eq!(broker.fetch_account().await.unwrap().equity, dec!(1050));
    }

    #[test]
    fn test_occ_underlying() {
        assert_eq!(occ_underlying("SPY240119C00400000"), "SPY");
        assert_eq!(occ_underlying("AAPL  240119P00150000"), "AAPL");
    }
}
