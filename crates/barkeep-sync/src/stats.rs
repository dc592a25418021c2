use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use barkeep_core::{Interval, UtcDateTime};

/// Process-local sync counters. Reset on restart, shared across every loop
/// through an `Arc`; exposed for observability only.
#[derive(Debug, Default)]
pub struct SyncStats {
    running: AtomicBool,
    candles_synced: AtomicU64,
    api_calls: AtomicU64,
    errors: AtomicU64,
    gaps_found: AtomicU64,
    gaps_filled: AtomicU64,
    started_at: Mutex<Option<UtcDateTime>>,
    last_sync_by_interval: Mutex<BTreeMap<Interval, UtcDateTime>>,
}

/// Serializable view of the counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub is_running: bool,
    pub uptime_seconds: Option<u64>,
    pub candles_synced: u64,
    pub api_calls: u64,
    pub errors: u64,
    pub gaps_found: u64,
    pub gaps_filled: u64,
    pub last_sync_by_interval: BTreeMap<String, UtcDateTime>,
}

/// Health derived from the counters; consumed by a health-check surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub is_running: bool,
    pub uptime_seconds: Option<u64>,
    pub candles_synced: u64,
    pub errors: u64,
}

/// Error budget before health flips unhealthy.
const ERROR_THRESHOLD: u64 = 100;
/// Freshly started processes get this long before "no syncs yet" counts
/// against them.
const STARTUP_GRACE_SECS: u64 = 120;

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_started(&self) {
        self.running.store(true, Ordering::Relaxed);
        *self
            .started_at
            .lock()
            .expect("stats start lock is not poisoned") = Some(UtcDateTime::now());
    }

    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn record_candles(&self, count: u64) {
        self.candles_synced.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_api_calls(&self, count: u64) {
        self.api_calls.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gap_found(&self) {
        self.gaps_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gap_filled(&self) {
        self.gaps_filled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_interval_sync(&self, interval: Interval) {
        self.last_sync_by_interval
            .lock()
            .expect("stats interval lock is not poisoned")
            .insert(interval, UtcDateTime::now());
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn uptime_seconds(&self) -> Option<u64> {
        self.started_at
            .lock()
            .expect("stats start lock is not poisoned")
            .map(|started| UtcDateTime::now().seconds_since(started))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last_sync_by_interval = self
            .last_sync_by_interval
            .lock()
            .expect("stats interval lock is not poisoned")
            .iter()
            .map(|(interval, at)| (interval.as_str().to_owned(), *at))
            .collect();

        StatsSnapshot {
            is_running: self.is_running(),
            uptime_seconds: self.uptime_seconds(),
            candles_synced: self.candles_synced.load(Ordering::Relaxed),
            api_calls: self.api_calls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            gaps_found: self.gaps_found.load(Ordering::Relaxed),
            gaps_filled: self.gaps_filled.load(Ordering::Relaxed),
            last_sync_by_interval,
        }
    }

    pub fn health(&self) -> HealthReport {
        let snapshot = self.snapshot();
        let within_grace = snapshot
            .uptime_seconds
            .is_some_and(|uptime| uptime < STARTUP_GRACE_SECS);
        let has_synced = snapshot.candles_synced > 0;

        HealthReport {
            healthy: snapshot.is_running
                && snapshot.errors < ERROR_THRESHOLD
                && (has_synced || within_grace),
            is_running: snapshot.is_running,
            uptime_seconds: snapshot.uptime_seconds,
            candles_synced: snapshot.candles_synced,
            errors: snapshot.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = SyncStats::new();
        stats.record_candles(48);
        stats.record_candles(1);
        stats.record_api_calls(3);
        stats.record_error();
        stats.record_gap_found();
        stats.record_gap_filled();
        stats.record_interval_sync(Interval::OneHour);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.candles_synced, 49);
        assert_eq!(snapshot.api_calls, 3);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.gaps_found, 1);
        assert_eq!(snapshot.gaps_filled, 1);
        assert!(snapshot.last_sync_by_interval.contains_key("1h"));
    }

    #[test]
    fn health_requires_running_and_bounded_errors() {
        let stats = SyncStats::new();
        assert!(!stats.health().healthy);

        stats.mark_started();
        stats.record_candles(10);
        assert!(stats.health().healthy);

        for _ in 0..ERROR_THRESHOLD {
            stats.record_error();
        }
        assert!(!stats.health().healthy);
    }

    #[test]
    fn fresh_start_is_healthy_before_first_sync() {
        let stats = SyncStats::new();
        stats.mark_started();
        // No candles yet, but well within the startup grace window.
        assert!(stats.health().healthy);
    }
}
