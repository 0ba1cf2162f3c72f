//! Splits an arbitrary query interval into calendar-day windows, because the
//! remote search protocol only accepts a single local calendar day per call.

use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;

/// A bounded interval in epoch milliseconds. Windows produced by
/// [`split_into_days`] span at most one local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl SearchWindow {
    pub fn span_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start_ms && timestamp_ms <= self.end_ms
    }
}

/// Epoch ms of the local midnight strictly after `t_ms`. `None` only for
/// timestamps outside chrono's representable range.
fn next_local_midnight_ms(t_ms: i64) -> Option<i64> {
    let local = DateTime::from_timestamp_millis(t_ms)?.with_timezone(&Local);
    let next_day = local.date_naive().succ_opt()?;
    let midnight = next_day.and_hms_opt(0, 0, 0)?;
    Some(
        Local
            .from_local_datetime(&midnight)
            .earliest()?
            .timestamp_millis(),
    )
}

/// Splits `[start_ms, end_ms]` into ordered, boundary-sharing windows: the
/// first runs to the end of `start_ms`'s local calendar day, the following
/// windows are midnight-to-midnight, and the last is capped at `end_ms`.
/// Always yields at least one window; an inverted interval collapses to the
/// degenerate point window at `start_ms`.
pub fn split_into_days(start_ms: i64, end_ms: i64) -> Vec<SearchWindow> {
    let mut windows = Vec::new();
    let mut cursor = start_ms;
    while cursor < end_ms {
        let boundary = next_local_midnight_ms(cursor).unwrap_or(end_ms);
        let window_end = boundary.min(end_ms);
        windows.push(SearchWindow {
            start_ms: cursor,
            end_ms: window_end,
        });
        cursor = window_end;
    }
    if windows.is_empty() {
        windows.push(SearchWindow {
            start_ms,
            end_ms: start_ms,
        });
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Local, TimeZone};

    const DAY_MS: i64 = 24 * 3600 * 1000;

    fn local_ms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
            .timestamp_millis()
    }

    fn assert_invariants(start: i64, end: i64, windows: &[SearchWindow]) {
        assert!(!windows.is_empty());
        assert_eq!(windows.first().unwrap().start_ms, start);
        assert_eq!(windows.last().unwrap().end_ms, end);
        for w in windows {
            assert!(w.end_ms >= w.start_ms);
            assert!(w.span_ms() <= DAY_MS + 3600 * 1000, "window longer than a day");
        }
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end_ms, pair[1].start_ms, "gap or overlap");
        }
    }

    #[test]
    fn single_day_interval_is_one_window() {
        let start = local_ms(2023, 6, 15, 9, 0, 0);
        let end = local_ms(2023, 6, 15, 17, 30, 0);
        let windows = split_into_days(start, end);
        assert_eq!(windows, vec![SearchWindow { start_ms: start, end_ms: end }]);
    }

    #[test]
    fn multi_day_interval_splits_at_midnights() {
        let start = local_ms(2023, 6, 15, 14, 30, 0);
        let end = local_ms(2023, 6, 18, 6, 0, 0);
        let windows = split_into_days(start, end);
        assert_eq!(windows.len(), 4);
        assert_invariants(start, end, &windows);
        assert_eq!(windows[0].end_ms, local_ms(2023, 6, 16, 0, 0, 0));
        assert_eq!(windows[1].end_ms, local_ms(2023, 6, 17, 0, 0, 0));
        assert_eq!(windows[2].span_ms(), DAY_MS);
        assert_eq!(windows[3].start_ms, local_ms(2023, 6, 18, 0, 0, 0));
    }

    #[test]
    fn start_at_midnight_yields_full_days() {
        let start = local_ms(2023, 6, 15, 0, 0, 0);
        let end = local_ms(2023, 6, 17, 0, 0, 0);
        let windows = split_into_days(start, end);
        assert_eq!(windows.len(), 2);
        assert_invariants(start, end, &windows);
        assert_eq!(windows[0].span_ms(), DAY_MS);
        assert_eq!(windows[1].span_ms(), DAY_MS);
    }

    #[test]
    fn point_interval_is_degenerate_window() {
        let at = local_ms(2023, 6, 15, 12, 0, 0);
        assert_eq!(
            split_into_days(at, at),
            vec![SearchWindow { start_ms: at, end_ms: at }]
        );
    }

    #[test]
    fn inverted_interval_collapses_to_start_point() {
        let start = local_ms(2023, 6, 15, 12, 0, 0);
        let windows = split_into_days(start, start - DAY_MS);
        assert_eq!(
            windows,
            vec![SearchWindow { start_ms: start, end_ms: start }]
        );
    }

    #[test]
    fn coverage_holds_over_many_offsets() {
        let base = local_ms(2023, 6, 15, 0, 0, 0);
        for start_offset in [0i64, 1, 999, 3_600_000, DAY_MS - 1] {
            for span in [0i64, 1, DAY_MS / 2, DAY_MS, 3 * DAY_MS + 12345] {
                let start = base + start_offset;
                let end = start + span;
                let windows = split_into_days(start, end);
                assert_invariants(start, end, &windows);
            }
        }
    }

    #[test]
    fn window_contains_is_inclusive() {
        let start = local_ms(2023, 6, 15, 9, 0, 0);
        let end = start + Duration::hours(1).num_milliseconds();
        let w = SearchWindow { start_ms: start, end_ms: end };
        assert!(w.contains(start));
        assert!(w.contains(end));
        assert!(!w.contains(end + 1));
    }
}
