//! Data models for bars, orders, positions, and the trade ledger.

mod bar;
mod ledger;
mod order;
mod position;

pub use bar::{Bar, BarMap, Interval, ParseIntervalError};
pub use ledger::{EquityPoint, Transaction};
pub use order::{is_crypto, AssetClass, Order, OrderSide, OrderStatus, TimeInForce};
pub use position::{Account, Position, OPTION_MULTIPLIER};
