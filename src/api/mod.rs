//! Broker and streamer collaborators, plus the bundled simulated pair.

mod broker;
mod dummy;
mod paper;
mod streamer;

pub use broker::{fetch_order_status, Broker};
pub use dummy::DummyStreamer;
pub use paper::{occ_underlying, PaperBroker};
pub use streamer::{BarSink, Streamer};
