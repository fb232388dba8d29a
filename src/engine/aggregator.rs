//! Resampling of finer bars into calendar-aligned coarser buckets.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::models::{Bar, Interval};

/// Resample `bars` into `target` buckets labelled by bucket start.
///
/// Per bucket: open = first, high = max, low = min, close = last,
/// volume = sum. Empty buckets produce no bar.
pub fn resample(bars: &[Bar], target: Interval) -> Vec<Bar> {
    let mut sorted: Vec<&Bar> = bars.iter().collect();
    sorted.sort_by_key(|b| b.timestamp);

    let mut buckets: BTreeMap<DateTime<Utc>, Bar> = BTreeMap::new();

    for bar in sorted {
        let start = target.bucket_start(bar.timestamp);
        buckets
            .entry(start)
            .and_modify(|agg| {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume += bar.volume;
            })
            .or_insert_with(|| bar.restamped(start));
    }

    buckets.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn minute_bars(start: DateTime<Utc>, rows: &[(i64, i64, i64, i64, i64)]) -> Vec<Bar> {
        rows.iter()
            .enumerate()
            .map(|(i, &(o, h, l, c, v))| {
                Bar::new(
                    start + Duration::minutes(i as i64),
                    Decimal::from(o),
                    Decimal::from(h),
                    Decimal::from(l),
                    Decimal::from(c),
                    Decimal::from(v),
                )
            })
            .collect()
    }

    #[test]
    fn test_five_minute_matches_direct_computation() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
        let bars = minute_bars(
            start,
            &[
                (10, 12, 9, 11, 100),
                (11, 15, 10, 14, 200),
                (14, 14, 7, 8, 50),
                (8, 9, 8, 9, 25),
                (9, 13, 9, 12, 125),
            ],
        );

        let out = resample(&bars, Interval::Min5);

        assert_eq!(out.len(), 1);
        let bar = &out[0];
        assert_eq!(bar.timestamp, start);
        assert_eq!(bar.open, dec!(10));
        assert_eq!(bar.high, dec!(15));
        assert_eq!(bar.low, dec!(7));
        assert_eq!(bar.close, dec!(12));
        assert_eq!(bar.volume, dec!(500));
    }

    #[test]
    fn test_reaggregation_is_idempotent() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
        let rows: Vec<(i64, i64, i64, i64, i64)> =
            (0..23).map(|i| (i, i + 3, i - 2, i + 1, 10)).collect();
        let bars = minute_bars(start, &rows);

        let five = resample(&bars, Interval::Min5);
        assert_eq!(five.len(), 5);
        assert_eq!(resample(&five, Interval::Min5), five);
    }

    #[test]
    fn test_buckets_are_calendar_aligned() {
        // 14:33 .. 14:41 straddles the 14:35 and 14:40 boundaries
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 14, 33, 0).unwrap();
        let rows: Vec<(i64, i64, i64, i64, i64)> = (0..9).map(|i| (i, i, i, i, 1)).collect();
        let bars = minute_bars(start, &rows);

        let out = resample(&bars, Interval::Min5);
        let stamps: Vec<_> = out.iter().map(|b| b.timestamp).collect();
        assert_eq!(
            stamps,
            vec![
                Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 2, 14, 35, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 2, 14, 40, 0).unwrap(),
            ]
        );
        assert_eq!(out[0].volume, dec!(2));
        assert_eq!(out[1].volume, dec!(5));
        assert_eq!(out[2].volume, dec!(2));
    }

    #[test]
    fn test_hour_and_day_buckets() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 23, 50, 0).unwrap();
        let rows: Vec<(i64, i64, i64, i64, i64)> = (0..20).map(|i| (i, i, i, i, 1)).collect();
        let bars = minute_bars(start, &rows);

        let hours = resample(&bars, Interval::Hr1);
        assert_eq!(hours.len(), 2);
        assert_eq!(hours[0].timestamp, Utc.with_ymd_and_hms(2024, 1, 2, 23, 0, 0).unwrap());
        assert_eq!(hours[0].close, dec!(9));
        assert_eq!(hours[1].open, dec!(10));

        let days = resample(&bars, Interval::Day1);
        assert_eq!(days.len(), 2);
        assert_eq!(days[1].timestamp, Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap());
        assert_eq!(days[1].volume, dec!(10));
    }

    #[test]
    fn test_unsorted_input() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
        let mut bars = minute_bars(start, &[(1, 1, 1, 1, 1), (2, 2, 2, 2, 1), (3, 3, 3, 3, 1)]);
        bars.reverse();

        let out = resample(&bars, Interval::Min5);
        assert_eq!(out[0].open, dec!(1));
        assert_eq!(out[0].close, dec!(3));
    }
}
