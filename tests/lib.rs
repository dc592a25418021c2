//! Shared fixtures for barkeep behavioral tests: a scriptable candle source
//! and throwaway warehouse builders.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tempfile::TempDir;

use barkeep_core::{
    Candle, CandleSource, Interval, ProviderId, ProviderPolicy, RangeFetch, SourceError,
    SourceFuture, Symbol, UtcDateTime,
};
use barkeep_warehouse::{CandleStore, WarehouseConfig};

/// Deterministic in-memory candle source.
///
/// `history` feeds `fetch_range` (filtered to the requested window) and
/// `recent` feeds `fetch_recent`; symbols listed as failing error on every
/// call, which is how scheduler resilience is exercised.
pub struct StubCandleSource {
    policy: ProviderPolicy,
    history: Mutex<Vec<Candle>>,
    recent: Mutex<Vec<Candle>>,
    failing_symbols: HashSet<String>,
    pub range_calls: AtomicU32,
    pub recent_calls: AtomicU32,
}

impl StubCandleSource {
    pub fn new() -> Self {
        Self {
            policy: ProviderPolicy::bybit_default(),
            history: Mutex::new(Vec::new()),
            recent: Mutex::new(Vec::new()),
            failing_symbols: HashSet::new(),
            range_calls: AtomicU32::new(0),
            recent_calls: AtomicU32::new(0),
        }
    }

    pub fn with_history(self, candles: Vec<Candle>) -> Self {
        *self.history.lock().expect("history lock") = candles;
        self
    }

    pub fn with_recent(self, candles: Vec<Candle>) -> Self {
        *self.recent.lock().expect("recent lock") = candles;
        self
    }

    pub fn failing_for(mut self, symbols: &[&str]) -> Self {
        self.failing_symbols = symbols.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn set_recent(&self, candles: Vec<Candle>) {
        *self.recent.lock().expect("recent lock") = candles;
    }

    pub fn range_calls(&self) -> u32 {
        self.range_calls.load(Ordering::Relaxed)
    }
}

impl Default for StubCandleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CandleSource for StubCandleSource {
    fn id(&self) -> ProviderId {
        ProviderId::Bybit
    }

    fn policy(&self) -> &ProviderPolicy {
        &self.policy
    }

    fn fetch_recent<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
        count: usize,
    ) -> SourceFuture<'a, Vec<Candle>> {
        self.recent_calls.fetch_add(1, Ordering::Relaxed);
        let failing = self.failing_symbols.contains(symbol.as_str());
        let mut matches: Vec<Candle> = self
            .recent
            .lock()
            .expect("recent lock")
            .iter()
            .filter(|candle| &candle.symbol == symbol && candle.interval == interval)
            .cloned()
            .collect();

        Box::pin(async move {
            if failing {
                return Err(SourceError::unavailable("stub: symbol configured to fail"));
            }
            matches.sort_by_key(|candle| candle.open_time);
            if matches.len() > count {
                matches.drain(..matches.len() - count);
            }
            Ok(matches)
        })
    }

    fn fetch_range<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> SourceFuture<'a, RangeFetch> {
        self.range_calls.fetch_add(1, Ordering::Relaxed);
        let failing = self.failing_symbols.contains(symbol.as_str());
        let mut matches: Vec<Candle> = self
            .history
            .lock()
            .expect("history lock")
            .iter()
            .filter(|candle| {
                &candle.symbol == symbol
                    && candle.interval == interval
                    && candle.open_time >= start
                    && candle.open_time <= end
            })
            .cloned()
            .collect();

        Box::pin(async move {
            if failing {
                return Err(SourceError::unavailable("stub: symbol configured to fail"));
            }
            matches.sort_by_key(|candle| candle.open_time);
            Ok(RangeFetch {
                candles: matches,
                effective_start: start,
                clamped: false,
                requests_made: 1,
                rows_skipped: 0,
            })
        })
    }
}

/// Open a candle store in a throwaway directory.
pub fn temp_store() -> (TempDir, CandleStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CandleStore::open(WarehouseConfig {
        home: dir.path().to_path_buf(),
        db_path: dir.path().join("warehouse.duckdb"),
        max_pool_size: 2,
    })
    .expect("store open");
    (dir, store)
}

/// Truncate a timestamp down to its hour bucket.
pub fn hour_floor(ts: UtcDateTime) -> UtcDateTime {
    let millis = ts.unix_millis();
    UtcDateTime::from_unix_millis(millis - millis.rem_euclid(3_600_000)).expect("aligned time")
}

/// `count` consecutive closed hourly candles whose last bar opens one hour
/// before `end_exclusive`.
pub fn hourly_series(symbol: &str, end_exclusive: UtcDateTime, count: u64) -> Vec<Candle> {
    let symbol = Symbol::parse(symbol).expect("symbol");
    (0..count)
        .map(|index| {
            let back = Duration::from_secs((count - index) * 3_600);
            let open_time = end_exclusive.checked_sub(back).expect("open time");
            let base = 42_000.0 + index as f64;
            Candle::new(
                symbol.clone(),
                Interval::OneHour,
                open_time,
                base,
                base + 50.0,
                base - 50.0,
                base + 20.0,
                1_000.0 + index as f64,
                None,
                None,
                ProviderId::Bybit,
                None,
            )
            .expect("valid candle")
        })
        .collect()
}
