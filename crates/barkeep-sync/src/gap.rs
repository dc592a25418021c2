use std::time::Duration;

use serde::Serialize;

use barkeep_core::{Interval, Symbol, UtcDateTime};
use barkeep_warehouse::CandleStore;

use crate::SyncError;

/// Default ceiling on how many candles a detected gap may span before it is
/// reported instead of auto-filled. Guards against clock skew or a
/// misconfigured interval triggering a runaway download.
pub const DEFAULT_MAX_FILLABLE: u64 = 5_000;

/// Classification of a (symbol, interval) pair's storage state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    /// Store is current; nothing to fetch.
    UpToDate,
    /// Some closed bars after the latest stored bar are missing.
    Behind,
    /// No data at all; the whole provider-allowed window is missing.
    FullHistory,
    /// Estimated size exceeds the auto-fill ceiling.
    TooLarge,
}

/// Transient result of gap analysis. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GapInfo {
    pub kind: GapKind,
    pub start: UtcDateTime,
    pub end: UtcDateTime,
    pub missing_candles: u64,
}

impl GapInfo {
    pub const fn needs_fill(&self) -> bool {
        matches!(self.kind, GapKind::Behind | GapKind::FullHistory)
    }
}

/// Pure gap analysis over the latest stored open time and the wall clock.
///
/// Convention, applied uniformly: a bar opening at B is closed once
/// `B + interval <= now`, and the missing count is the number of fully closed
/// bars after the latest stored bar: `floor((now - latest) / interval) - 1`.
/// With latest = T and now = T + 3h on 1h bars, the bars at T+1h and T+2h are
/// missing (2); the bar at T+3h is "now" and not yet closed.
pub fn analyze_gap(
    latest: Option<UtcDateTime>,
    interval: Interval,
    now: UtcDateTime,
    max_lookback: Duration,
    max_fillable: u64,
) -> GapInfo {
    let interval_secs = interval.duration_secs();

    let Some(latest) = latest else {
        let start = now.checked_sub(max_lookback).unwrap_or(now);
        let missing = max_lookback.as_secs() / interval_secs;
        let kind = if missing > max_fillable {
            GapKind::TooLarge
        } else {
            GapKind::FullHistory
        };
        return GapInfo {
            kind,
            start,
            end: now,
            missing_candles: missing,
        };
    };

    let elapsed = now.seconds_since(latest);
    let closed_after_latest = (elapsed / interval_secs).saturating_sub(1);

    if closed_after_latest == 0 {
        return GapInfo {
            kind: GapKind::UpToDate,
            start: now,
            end: now,
            missing_candles: 0,
        };
    }

    let start = latest
        .checked_add(interval.duration())
        .unwrap_or(latest);
    let kind = if closed_after_latest > max_fillable {
        GapKind::TooLarge
    } else {
        GapKind::Behind
    };

    GapInfo {
        kind,
        start,
        end: now,
        missing_candles: closed_after_latest,
    }
}

/// Binds the pure analysis to a store.
#[derive(Clone)]
pub struct GapDetector {
    store: CandleStore,
    max_fillable: u64,
}

impl GapDetector {
    pub fn new(store: CandleStore) -> Self {
        Self {
            store,
            max_fillable: DEFAULT_MAX_FILLABLE,
        }
    }

    pub fn with_max_fillable(mut self, max_fillable: u64) -> Self {
        self.max_fillable = max_fillable;
        self
    }

    pub fn detect(
        &self,
        symbol: &Symbol,
        interval: Interval,
        now: UtcDateTime,
        max_lookback: Duration,
    ) -> Result<GapInfo, SyncError> {
        let latest = self.store.latest_open_time(symbol, interval)?;
        Ok(analyze_gap(
            latest,
            interval,
            now,
            max_lookback,
            self.max_fillable,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: u64 = 3_600;

    fn ts(value: &str) -> UtcDateTime {
        UtcDateTime::parse(value).expect("timestamp")
    }

    #[test]
    fn three_hours_behind_on_hourly_bars_misses_two() {
        let gap = analyze_gap(
            Some(ts("2024-01-01T00:00:00Z")),
            Interval::OneHour,
            ts("2024-01-01T03:00:00Z"),
            Duration::from_secs(180 * 24 * HOUR),
            DEFAULT_MAX_FILLABLE,
        );

        assert_eq!(gap.kind, GapKind::Behind);
        assert_eq!(gap.start, ts("2024-01-01T01:00:00Z"));
        assert_eq!(gap.end, ts("2024-01-01T03:00:00Z"));
        assert_eq!(gap.missing_candles, 2);
    }

    #[test]
    fn open_current_bar_is_not_a_gap() {
        // 90 minutes after the last stored hourly bar only the bar at T+1h
        // exists, and it is still open.
        let gap = analyze_gap(
            Some(ts("2024-01-01T00:00:00Z")),
            Interval::OneHour,
            ts("2024-01-01T01:30:00Z"),
            Duration::from_secs(180 * 24 * HOUR),
            DEFAULT_MAX_FILLABLE,
        );
        assert_eq!(gap.kind, GapKind::UpToDate);
        assert_eq!(gap.missing_candles, 0);
    }

    #[test]
    fn exactly_two_intervals_behind_misses_one() {
        let gap = analyze_gap(
            Some(ts("2024-01-01T00:00:00Z")),
            Interval::OneHour,
            ts("2024-01-01T02:00:00Z"),
            Duration::from_secs(180 * 24 * HOUR),
            DEFAULT_MAX_FILLABLE,
        );
        assert_eq!(gap.kind, GapKind::Behind);
        assert_eq!(gap.missing_candles, 1);
        assert_eq!(gap.start, ts("2024-01-01T01:00:00Z"));
    }

    #[test]
    fn empty_store_requests_full_history() {
        let lookback = Duration::from_secs(7 * 24 * HOUR);
        let gap = analyze_gap(
            None,
            Interval::OneHour,
            ts("2024-01-08T00:00:00Z"),
            lookback,
            DEFAULT_MAX_FILLABLE,
        );

        assert_eq!(gap.kind, GapKind::FullHistory);
        assert_eq!(gap.start, ts("2024-01-01T00:00:00Z"));
        assert_eq!(gap.missing_candles, 7 * 24);
    }

    #[test]
    fn oversized_gap_is_flagged_not_filled() {
        let gap = analyze_gap(
            None,
            Interval::OneMinute,
            ts("2024-01-08T00:00:00Z"),
            Duration::from_secs(30 * 24 * HOUR),
            DEFAULT_MAX_FILLABLE,
        );
        assert_eq!(gap.kind, GapKind::TooLarge);
        assert!(!gap.needs_fill());
        assert_eq!(gap.missing_candles, 30 * 24 * 60);
    }
}
