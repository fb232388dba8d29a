//! Wall-clock cadence rules for strategy invocation.

use chrono::{DateTime, NaiveTime, Timelike, Utc};

use crate::models::Interval;

/// Decides whether an interval is due at a timestamp. Stateless apart from
/// the daily cutoff.
#[derive(Debug, Clone, Copy)]
pub struct CadenceGate {
    daily_cutoff: NaiveTime,
}

impl CadenceGate {
    pub fn new(daily_cutoff: NaiveTime) -> Self {
        Self { daily_cutoff }
    }

    /// For example, a 30MIN strategy is due at minutes 0 and 30.
    pub fn is_due(&self, ts: DateTime<Utc>, interval: Interval) -> bool {
        let minute = ts.minute();
        match interval {
            Interval::Min1 => true,
            Interval::Hr1 => minute == 0,
            Interval::Day1 => {
                ts.hour() == self.daily_cutoff.hour() && minute == self.daily_cutoff.minute()
            }
            other => minute % other.minutes() == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, hour, minute, 0).unwrap()
    }

    fn gate() -> CadenceGate {
        CadenceGate::new(NaiveTime::from_hms_opt(19, 50, 0).unwrap())
    }

    #[test]
    fn test_one_minute_always_due() {
        let gate = gate();
        assert!((0..60).all(|m| gate.is_due(at(10, m), Interval::Min1)));
    }

    #[test]
    fn test_fifteen_minute() {
        let gate = gate();
        let due: Vec<u32> = (0..60).filter(|&m| gate.is_due(at(10, m), Interval::Min15)).collect();
        assert_eq!(due, vec![0, 15, 30, 45]);
    }

    #[test]
    fn test_five_and_thirty_minute() {
        let gate = gate();
        assert!(gate.is_due(at(9, 35), Interval::Min5));
        assert!(!gate.is_due(at(9, 36), Interval::Min5));
        assert!(gate.is_due(at(9, 30), Interval::Min30));
        assert!(!gate.is_due(at(9, 45), Interval::Min30));
    }

    #[test]
    fn test_hour() {
        let gate = gate();
        assert!(gate.is_due(at(13, 0), Interval::Hr1));
        assert!(!gate.is_due(at(13, 30), Interval::Hr1));
    }

    #[test]
    fn test_daily_cutoff_is_configurable() {
        assert!(gate().is_due(at(19, 50), Interval::Day1));
        assert!(!gate().is_due(at(19, 51), Interval::Day1));
        assert!(!gate().is_due(at(0, 0), Interval::Day1));

        let early = CadenceGate::new(NaiveTime::from_hms_opt(15, 45, 0).unwrap());
        assert!(early.is_due(at(15, 45), Interval::Day1));
        assert!(!early.is_due(at(19, 50), Interval::Day1));
    }
}
