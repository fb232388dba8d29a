//! Transaction log and equity curve records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{AssetClass, OrderSide};

/// One submitted order, as recorded in the transaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub timestamp: DateTime<Utc>,
    pub side: OrderSide,
    pub asset_class: AssetClass,
    pub symbol: String,
    pub quantity: Decimal,
    pub order_id: String,
}

/// Account value at the end of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub cash: Decimal,
    pub equity: Decimal,
}
