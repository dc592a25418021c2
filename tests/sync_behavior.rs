//! Behavior-driven tests for the sync engine: startup gap repair, live
//! polling, and the coordinator lifecycle, all against a scripted source and
//! a throwaway warehouse.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use barkeep_core::{CandleSource, Interval, Symbol, UtcDateTime};
use barkeep_sync::{
    BackfillExecutor, CoordinatorOptions, GapDetector, GapKind, MinHistory, SchedulerLoop,
    SyncCoordinator, SyncFeed, SyncSchedule, SyncStats,
};
use barkeep_tests::{hour_floor, hourly_series, temp_store, StubCandleSource};

fn symbol(name: &str) -> Symbol {
    Symbol::parse(name).expect("symbol")
}

fn hourly_schedule() -> SyncSchedule {
    SyncSchedule::new(Interval::OneHour, 3_600, 2)
}

// =============================================================================
// End-to-end: detect -> backfill -> live tick
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn when_startup_sequence_runs_then_one_tick_the_store_holds_49_bars() {
    // Given: an empty store and a provider with 48 closed hourly bars for the
    // last two days
    let (_dir, store) = temp_store();
    let btc = symbol("BTCUSDT");
    let now = UtcDateTime::parse("2024-03-01T12:00:00Z").expect("timestamp");
    let history = hourly_series("BTCUSDT", now, 48);
    let source = Arc::new(StubCandleSource::new().with_history(history));
    let stats = Arc::new(SyncStats::new());

    // When: the startup sequence detects and fills the gap
    let detector = GapDetector::new(store.clone());
    let lookback = source.policy().max_lookback(Interval::OneHour);
    let gap = detector
        .detect(&btc, Interval::OneHour, now, lookback)
        .expect("detect");
    assert_eq!(gap.kind, GapKind::FullHistory);

    let executor = BackfillExecutor::new(store.clone(), source.clone(), Arc::clone(&stats));
    let report = executor
        .fill(&btc, Interval::OneHour, &gap)
        .await
        .expect("fill");

    // Then: all 48 bars are stored
    assert_eq!(report.rows_written, 48);
    assert_eq!(store.count(&btc, Interval::OneHour).expect("count"), 48);

    // When: the provider closes bar 49 and one scheduler tick runs
    let next_hour = now
        .checked_add(Duration::from_secs(3_600))
        .expect("next hour");
    source.set_recent(hourly_series("BTCUSDT", next_hour, 1));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = SchedulerLoop::new(
        store.clone(),
        source.clone(),
        Arc::clone(&stats),
        hourly_schedule(),
        vec![btc.clone()],
        shutdown_rx,
    );
    scheduler.tick().await.expect("tick");

    // Then: 49 bars, no duplicates
    assert_eq!(store.count(&btc, Interval::OneHour).expect("count"), 49);
    assert_eq!(stats.snapshot().candles_synced, 49);
}

#[tokio::test(flavor = "multi_thread")]
async fn when_a_gap_is_filled_detection_reports_up_to_date() {
    // Given: a store caught up through the last closed hourly bar
    let (_dir, store) = temp_store();
    let btc = symbol("BTCUSDT");
    let now = UtcDateTime::parse("2024-03-01T12:30:00Z").expect("timestamp");
    let bucket = UtcDateTime::parse("2024-03-01T12:00:00Z").expect("timestamp");
    let source = Arc::new(StubCandleSource::new().with_history(hourly_series("BTCUSDT", bucket, 48)));
    let stats = Arc::new(SyncStats::new());

    let detector = GapDetector::new(store.clone());
    let lookback = source.policy().max_lookback(Interval::OneHour);
    let gap = detector
        .detect(&btc, Interval::OneHour, now, lookback)
        .expect("detect");
    let executor = BackfillExecutor::new(store.clone(), source.clone(), Arc::clone(&stats));
    executor
        .fill(&btc, Interval::OneHour, &gap)
        .await
        .expect("fill");

    // When: detection runs again at the same wall clock
    let after = detector
        .detect(&btc, Interval::OneHour, now, lookback)
        .expect("detect again");

    // Then: no gap remains
    assert_eq!(after.kind, GapKind::UpToDate);
    assert_eq!(after.missing_candles, 0);
}

// =============================================================================
// Scheduler resilience
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn when_the_second_of_three_symbols_fails_the_other_two_still_sync() {
    // Given: three symbols, the middle one scripted to fail
    let (_dir, store) = temp_store();
    let end = UtcDateTime::parse("2024-03-01T12:00:00Z").expect("timestamp");
    let mut recent = hourly_series("BTCUSDT", end, 2);
    recent.extend(hourly_series("ETHUSDT", end, 2));
    recent.extend(hourly_series("SOLUSDT", end, 2));
    let source = Arc::new(
        StubCandleSource::new()
            .with_recent(recent)
            .failing_for(&["ETHUSDT"]),
    );
    let stats = Arc::new(SyncStats::new());

    // When: one sweep runs
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = SchedulerLoop::new(
        store.clone(),
        source,
        Arc::clone(&stats),
        hourly_schedule(),
        vec![symbol("BTCUSDT"), symbol("ETHUSDT"), symbol("SOLUSDT")],
        shutdown_rx,
    );
    let synced = scheduler.tick().await.expect("tick");

    // Then: the healthy symbols landed, the failure was counted, nothing
    // blocked the sweep
    assert_eq!(synced, 2);
    assert_eq!(
        store
            .count(&symbol("BTCUSDT"), Interval::OneHour)
            .expect("count"),
        2
    );
    assert_eq!(
        store
            .count(&symbol("SOLUSDT"), Interval::OneHour)
            .expect("count"),
        2
    );
    assert_eq!(
        store
            .count(&symbol("ETHUSDT"), Interval::OneHour)
            .expect("count"),
        0
    );
    assert_eq!(stats.snapshot().errors, 1);
}

// =============================================================================
// Minimum-history bootstrap
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn when_history_is_below_minimum_the_executor_backfills_until_satisfied() {
    // Given: a provider with 30 recent hourly bars and an empty store
    let (_dir, store) = temp_store();
    let mgc = symbol("MGC");
    let bucket = hour_floor(UtcDateTime::now());
    let bars = hourly_series("MGC", bucket, 30);
    let source = Arc::new(StubCandleSource::new().with_history(bars));
    let stats = Arc::new(SyncStats::new());
    let executor = BackfillExecutor::new(store.clone(), source.clone(), stats);

    // When: the minimum of 20 bars is enforced
    let count = executor
        .ensure_min_history(&mgc, Interval::OneHour, 20, 3)
        .await
        .expect("bootstrap");

    // Then: the shortfall was filled in one round
    assert!(count >= 20, "expected at least 20 bars, got {count}");
    assert_eq!(store.count(&mgc, Interval::OneHour).expect("count"), 30);

    // And when: the minimum cannot be met, the rounds cap the work
    let calls_before = source.range_calls();
    let count = executor
        .ensure_min_history(&mgc, Interval::OneHour, 200, 3)
        .await
        .expect("bounded bootstrap");
    assert_eq!(count, 30);
    assert!(source.range_calls() > calls_before);
}

// =============================================================================
// Coordinator lifecycle
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn when_configuration_is_invalid_the_coordinator_refuses_to_construct() {
    let (_dir, store) = temp_store();

    // No feeds at all
    assert!(SyncCoordinator::new(store.clone(), Vec::new(), CoordinatorOptions::default()).is_err());

    // A feed without symbols
    let empty_symbols = SyncFeed {
        source: Arc::new(StubCandleSource::new()),
        symbols: Vec::new(),
        schedules: vec![hourly_schedule()],
        min_history: None,
    };
    assert!(
        SyncCoordinator::new(store.clone(), vec![empty_symbols], CoordinatorOptions::default())
            .is_err()
    );

    // A schedule polling a single bar cannot refresh the open bar
    let single_bar_poll = SyncFeed {
        source: Arc::new(StubCandleSource::new()),
        symbols: vec![symbol("BTCUSDT")],
        schedules: vec![SyncSchedule::new(Interval::OneHour, 3_600, 1)],
        min_history: None,
    };
    assert!(
        SyncCoordinator::new(store, vec![single_bar_poll], CoordinatorOptions::default()).is_err()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn when_the_coordinator_starts_it_backfills_then_polls_then_stops_cleanly() {
    // Given: a feed whose provider has two days of history and a fresh bar
    let (_dir, store) = temp_store();
    let btc = symbol("BTCUSDT");
    let bucket = hour_floor(UtcDateTime::now());
    let next_hour = bucket
        .checked_add(Duration::from_secs(3_600))
        .expect("next hour");
    let source = Arc::new(
        StubCandleSource::new()
            .with_history(hourly_series("BTCUSDT", bucket, 48))
            .with_recent(hourly_series("BTCUSDT", next_hour, 2)),
    );

    let feed = SyncFeed {
        source: source.clone(),
        symbols: vec![btc.clone()],
        schedules: vec![hourly_schedule()],
        min_history: Some(MinHistory {
            min_candles: 10,
            max_rounds: 2,
        }),
    };

    // When: the coordinator starts
    let mut coordinator =
        SyncCoordinator::new(store.clone(), vec![feed], CoordinatorOptions::default())
            .expect("valid config");
    coordinator.start().await.expect("start");

    // Then: the startup pass already closed the gap and one loop is live
    assert_eq!(coordinator.active_loops(), 1);
    assert!(store.count(&btc, Interval::OneHour).expect("count") >= 48);
    let stats = coordinator.stats();
    assert!(stats.is_running);
    assert!(stats.gaps_found >= 1);
    assert!(stats.gaps_filled >= 1);
    assert!(coordinator.health().healthy);

    // And: stop drains the task group without dangling work
    coordinator.stop().await;
    assert_eq!(coordinator.active_loops(), 0);
    assert!(!coordinator.stats().is_running);
}
