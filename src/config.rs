//! Trader and simulation configuration.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::Interval;

/// Trader-level defaults that strategies inherit when they leave a field unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraderConfig {
    /// Symbols watched for every strategy; crypto symbols start with `@`
    pub watchlist: Vec<String>,

    /// Default strategy invocation interval
    pub interval: Interval,

    /// Extra intervals to maintain aggregated history for
    pub aggregations: Vec<Interval>,

    /// How long to wait for stragglers once a period has started (milliseconds)
    pub timeout_ms: u64,

    /// UTC wall-clock time at which 1DAY strategies run, "HH:MM"
    pub daily_cutoff: String,

    /// Load positions and pending orders from the broker at startup
    pub sync: bool,

    /// Rotate streamer credentials when the hour is a multiple of this
    pub cred_refresh_hours: u32,
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            watchlist: Vec::new(),
            interval: Interval::Min5,
            aggregations: Vec::new(),
            timeout_ms: 1000,                // 1 second
            daily_cutoff: "19:50".to_string(), // 10 minutes before the US close
            sync: true,
            cred_refresh_hours: 12,
        }
    }
}

impl TraderConfig {
    /// Parsed daily cutoff.
    pub fn cutoff(&self) -> EngineResult<NaiveTime> {
        NaiveTime::parse_from_str(&self.daily_cutoff, "%H:%M").map_err(|e| {
            EngineError::config(format!(
                "invalid daily_cutoff '{}' (expected HH:MM): {}",
                self.daily_cutoff, e
            ))
        })
    }
}

/// Settings for the simulated streamer and paper broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Paper account starting cash
    pub starting_cash: Decimal,

    /// Real time between simulated 1MIN bars (milliseconds)
    pub tick_ms: u64,

    /// Probability that a symbol's bar is withheld in a given period
    pub dropout: f64,

    /// Minutes of synthetic history served for backfill
    pub history_minutes: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            starting_cash: dec!(100000),
            tick_ms: 60_000, // real-time minutes
            dropout: 0.0,
            history_minutes: 600,
        }
    }
}

/// Top-level TOML file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub trader: TraderConfig,
    pub simulation: SimulationConfig,
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TraderConfig::default();
        assert_eq!(config.interval, Interval::Min5);
        assert_eq!(config.timeout_ms, 1000);
        assert_eq!(config.cutoff().unwrap(), NaiveTime::from_hms_opt(19, 50, 0).unwrap());
    }

    #[test]
    fn test_bad_cutoff() {
        let config = TraderConfig {
            daily_cutoff: "7pm".to_string(),
            ..TraderConfig::default()
        };
        assert!(matches!(config.cutoff(), Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            [trader]
            watchlist = ["SPY", "@BTC"]
            interval = "15MIN"
            aggregations = ["1HR", "1DAY"]
            daily_cutoff = "15:45"

            [simulation]
            starting_cash = "2500"
            dropout = 0.1
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();

        assert_eq!(config.trader.watchlist, vec!["SPY", "@BTC"]);
        assert_eq!(config.trader.interval, Interval::Min15);
        assert_eq!(config.trader.aggregations, vec![Interval::Hr1, Interval::Day1]);
        assert!(config.trader.sync);
        assert_eq!(config.simulation.starting_cash, dec!(2500));
        assert_eq!(config.simulation.tick_ms, 60_000);
    }
}
