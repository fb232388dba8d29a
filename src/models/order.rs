//! Order records exchanged with the broker.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instrument class of an order or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetClass {
    Stock,
    Option,
    Crypto,
}

impl AssetClass {
    /// Class implied by a symbol's prefix. Crypto symbols start with `@`.
    pub fn of_symbol(symbol: &str) -> Self {
        if is_crypto(symbol) {
            AssetClass::Crypto
        } else {
            AssetClass::Stock
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Stock => "stock",
            AssetClass::Option => "option",
            AssetClass::Crypto => "crypto",
        }
    }
}

/// `@ETH` is Ethereum, `ETH` is Ethan Allen Interiors.
pub fn is_crypto(symbol: &str) -> bool {
    symbol.starts_with('@')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    /// Good-til-cancelled
    #[default]
    Gtc,
    /// Expires at the end of the trading day
    Day,
}

/// An order as last reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Broker-assigned order id
    pub id: String,

    /// Instrument class tag; required to query status. A record without it
    /// is malformed broker data.
    #[serde(rename = "type", default)]
    pub asset_class: Option<AssetClass>,

    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,

    #[serde(default)]
    pub time_in_force: TimeInForce,

    pub status: OrderStatus,

    /// Average fill price, once filled
    #[serde(default)]
    pub filled_price: Option<Decimal>,

    pub submitted_at: DateTime<Utc>,
}

impl Order {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}
