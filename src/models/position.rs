//! Position and account snapshots.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::AssetClass;

/// Contract size of a standard equity option.
pub const OPTION_MULTIPLIER: Decimal = dec!(100);

/// Current holding of one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Ticker; for options this is the underlying
    pub symbol: String,

    pub asset_class: AssetClass,

    /// Units held (contracts for options)
    pub quantity: Decimal,

    /// Average cost per unit
    pub avg_cost: Decimal,

    /// Last price per unit
    #[serde(default)]
    pub current_price: Decimal,

    /// `current_price * quantity * multiplier`
    #[serde(default)]
    pub market_value: Decimal,

    /// OCC contract identifier, options only
    #[serde(default)]
    pub contract: Option<String>,

    #[serde(default = "one")]
    pub multiplier: Decimal,
}

fn one() -> Decimal {
    Decimal::ONE
}

impl Position {
    /// Create a stock or crypto position from an initial fill.
    pub fn new(symbol: String, quantity: Decimal, price: Decimal) -> Self {
        let asset_class = AssetClass::of_symbol(&symbol);
        Self {
            symbol,
            asset_class,
            quantity,
            avg_cost: price,
            current_price: price,
            market_value: quantity * price,
            contract: None,
            multiplier: Decimal::ONE,
        }
    }

    /// Create an option position on `underlying`.
    pub fn option(underlying: String, contract: String, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: underlying,
            asset_class: AssetClass::Option,
            quantity,
            avg_cost: price,
            current_price: price,
            market_value: quantity * price * OPTION_MULTIPLIER,
            contract: Some(contract),
            multiplier: OPTION_MULTIPLIER,
        }
    }

    /// Re-mark the position at `price`.
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        self.market_value = price * self.quantity * self.multiplier;
    }

    /// Add to the position, averaging the cost.
    pub fn add(&mut self, quantity: Decimal, price: Decimal) {
        let total_cost = self.avg_cost * self.quantity + price * quantity;
        let new_quantity = self.quantity + quantity;

        if !new_quantity.is_zero() {
            self.avg_cost = total_cost / new_quantity;
        }

        self.quantity = new_quantity;
        self.update_price(price);
    }

    /// Reduce the position; returns the quantity actually removed.
    pub fn reduce(&mut self, quantity: Decimal, price: Decimal) -> Decimal {
        let removed = quantity.min(self.quantity);
        self.quantity -= removed;
        self.update_price(price);
        removed
    }

    pub fn is_closed(&self) -> bool {
        self.quantity < Decimal::new(1, 6)
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.current_price - self.avg_cost) * self.quantity * self.multiplier
    }
}

/// Broker account snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub cash: Decimal,

    /// Cash plus the market value of all holdings
    pub equity: Decimal,

    #[serde(default)]
    pub buying_power: Decimal,
}

impl Account {
    pub fn with_cash(cash: Decimal) -> Self {
        Self {
            cash,
            equity: cash,
            buying_power: cash,
        }
    }
}
