//! Cycle machinery: collection, deadline, reconciliation, refresh, scheduling.

pub mod aggregator;
pub mod cadence;
pub mod collector;
pub mod portfolio;
pub mod reconciler;
pub mod scheduler;
pub mod watchdog;

pub use cadence::CadenceGate;
pub use collector::{Arrival, BarCollector, FlushReason, FlushedBatch, PartialBatch};
pub use portfolio::{Portfolio, RefreshKind};
pub use reconciler::reconcile_orders;
pub use scheduler::{AlgorithmHandle, ScheduleOutcome, Scheduler};
pub use watchdog::{fill_missing, Watchdog};
