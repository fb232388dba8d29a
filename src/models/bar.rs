//! OHLCV bar and the interval vocabulary bars are produced at.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bar granularity, ordered finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1MIN")]
    Min1,
    #[serde(rename = "5MIN")]
    Min5,
    #[serde(rename = "15MIN")]
    Min15,
    #[serde(rename = "30MIN")]
    Min30,
    #[serde(rename = "1HR")]
    Hr1,
    #[serde(rename = "1DAY")]
    Day1,
}

impl Interval {
    pub const ALL: [Interval; 6] = [
        Interval::Min1,
        Interval::Min5,
        Interval::Min15,
        Interval::Min30,
        Interval::Hr1,
        Interval::Day1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Min1 => "1MIN",
            Interval::Min5 => "5MIN",
            Interval::Min15 => "15MIN",
            Interval::Min30 => "30MIN",
            Interval::Hr1 => "1HR",
            Interval::Day1 => "1DAY",
        }
    }

    /// Length of the interval in minutes.
    pub fn minutes(&self) -> u32 {
        match self {
            Interval::Min1 => 1,
            Interval::Min5 => 5,
            Interval::Min15 => 15,
            Interval::Min30 => 30,
            Interval::Hr1 => 60,
            Interval::Day1 => 1440,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes() as i64)
    }

    /// Start of the calendar-aligned bucket containing `ts`.
    ///
    /// Every interval length divides a UTC day evenly, so flooring the epoch
    /// offset lands on minute multiples within the hour, hour boundaries, or
    /// UTC midnight.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let span = self.minutes() as i64 * 60;
        let secs = ts.timestamp();
        DateTime::from_timestamp(secs - secs.rem_euclid(span), 0).unwrap_or(ts)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported interval '{0}', expected one of 1MIN, 5MIN, 15MIN, 30MIN, 1HR, 1DAY")]
pub struct ParseIntervalError(pub String);

impl FromStr for Interval {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Interval::ALL
            .into_iter()
            .find(|i| i.as_str() == wanted)
            .ok_or_else(|| ParseIntervalError(s.to_string()))
    }
}

/// One OHLCV record for a symbol at a given interval and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time (UTC)
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Copy of this bar carrying a different timestamp.
    pub fn restamped(&self, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }
}

/// A symbol→bar mapping, as pushed by a streamer or flushed by the collector.
pub type BarMap = BTreeMap<String, Bar>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_interval_ordering() {
        assert!(Interval::Min1 < Interval::Min5);
        assert!(Interval::Min30 < Interval::Hr1);
        assert!(Interval::Hr1 < Interval::Day1);
        assert_eq!(Interval::ALL.iter().min(), Some(&Interval::Min1));
    }

    #[test]
    fn test_interval_parse() {
        assert_eq!("15MIN".parse::<Interval>(), Ok(Interval::Min15));
        assert_eq!("1hr".parse::<Interval>(), Ok(Interval::Hr1));
        assert!("2MIN".parse::<Interval>().is_err());
        assert_eq!(Interval::Day1.to_string(), "1DAY");
    }

    #[test]
    fn test_bucket_start() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 37, 0).unwrap();

        assert_eq!(Interval::Min1.bucket_start(ts), ts);
        assert_eq!(
            Interval::Min5.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 3, 5, 14, 35, 0).unwrap()
        );
        assert_eq!(
            Interval::Min15.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap()
        );
        assert_eq!(
            Interval::Hr1.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap()
        );
        assert_eq!(
            Interval::Day1.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_interval_serde_names() {
        let json = serde_json::to_string(&Interval::Min30).unwrap();
        assert_eq!(json, "\"30MIN\"");
        let back: Interval = serde_json::from_str("\"1DAY\"").unwrap();
        assert_eq!(back, Interval::Day1);
    }
}
