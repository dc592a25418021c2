use std::sync::{Arc, Mutex, MutexGuard};

use ::duckdb::{params, Connection};
use serde::Serialize;
use tracing::{debug, warn};

use barkeep_core::{Candle, Interval, ProviderId, Symbol, UtcDateTime};

use crate::duckdb::{AccessMode, DuckDbConnectionManager};
use crate::{migrations, views, WarehouseConfig, WarehouseError};

/// Result of a single-row upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Aggregate result of a batched upsert. Failed rows were logged and skipped;
/// everything else is committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkUpsertReport {
    pub inserted: u64,
    pub updated: u64,
    pub failed: u64,
}

impl BulkUpsertReport {
    pub const fn written(&self) -> u64 {
        self.inserted + self.updated
    }
}

/// Storage coverage for one (symbol, interval) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub symbol: Symbol,
    pub interval: Interval,
    pub candle_count: u64,
    pub earliest_open_time: Option<UtcDateTime>,
    pub latest_open_time: Option<UtcDateTime>,
}

/// What kind of sync produced a batch of writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRunKind {
    Backfill,
    Live,
}

impl SyncRunKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backfill => "backfill",
            Self::Live => "live",
        }
    }
}

/// One sync_log row.
#[derive(Debug, Clone)]
pub struct SyncRunRecord {
    pub run_id: String,
    pub symbol: Symbol,
    pub interval: Interval,
    pub kind: SyncRunKind,
    pub rows_written: u64,
    pub ok: bool,
    pub detail: Option<String>,
    pub latency_ms: Option<u64>,
}

/// DuckDB-backed candle store.
///
/// The (symbol, interval, open_time) primary key makes every write an
/// idempotent upsert. Writes are funneled through a single writer gate: the
/// process is the only writer and DuckDB's optimistic concurrency would turn
/// same-row races into transaction conflicts rather than queueing them.
#[derive(Clone)]
pub struct CandleStore {
    manager: DuckDbConnectionManager,
    write_gate: Arc<Mutex<()>>,
}

impl CandleStore {
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::new(config.db_path.clone(), config.max_pool_size);
        let store = Self {
            manager,
            write_gate: Arc::new(Mutex::new(())),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        migrations::apply_migrations(&connection)?;
        views::create_views(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &std::path::Path {
        self.manager.db_path()
    }

    /// Insert or overwrite one candle, keyed by (symbol, interval, open_time).
    pub fn upsert(&self, candle: &Candle) -> Result<UpsertOutcome, WarehouseError> {
        let _writer = self.writer();
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        upsert_row(&connection, candle)
    }

    /// Upsert a batch. Each row stands alone: a failing row is logged,
    /// counted, and skipped without touching rows already written.
    pub fn bulk_upsert(
        &self,
        candles: &[Candle],
        batch_size: usize,
    ) -> Result<BulkUpsertReport, WarehouseError> {
        if candles.is_empty() {
            return Ok(BulkUpsertReport::default());
        }

        let _writer = self.writer();
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let mut report = BulkUpsertReport::default();

        for batch in candles.chunks(batch_size.max(1)) {
            for candle in batch {
                match upsert_row(&connection, candle) {
                    Ok(UpsertOutcome::Inserted) => report.inserted += 1,
                    Ok(UpsertOutcome::Updated) => report.updated += 1,
                    Err(error) => {
                        report.failed += 1;
                        warn!(
                            symbol = %candle.symbol,
                            interval = %candle.interval,
                            open_time = %candle.open_time,
                            "skipping candle write: {error}"
                        );
                    }
                }
            }
            debug!(
                batch_len = batch.len(),
                inserted = report.inserted,
                updated = report.updated,
                "processed upsert batch"
            );
        }

        Ok(report)
    }

    /// Newest stored candle for the pair, if any.
    pub fn latest(
        &self,
        symbol: &Symbol,
        interval: Interval,
    ) -> Result<Option<Candle>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let mut statement = connection.prepare(
            "SELECT symbol, interval, strftime(open_time, '%Y-%m-%dT%H:%M:%SZ'), \
             open, high, low, close, volume, quote_volume, trade_count, source, raw_payload \
             FROM candles WHERE symbol = ? AND interval = ? \
             ORDER BY open_time DESC LIMIT 1",
        )?;
        let mut rows = statement.query_map(
            params![symbol.as_str(), interval.as_str()],
            read_raw_candle,
        )?;

        match rows.next() {
            Some(raw) => Ok(Some(raw_to_candle(raw?)?)),
            None => Ok(None),
        }
    }

    /// Open time of the newest stored candle for the pair.
    pub fn latest_open_time(
        &self,
        symbol: &Symbol,
        interval: Interval,
    ) -> Result<Option<UtcDateTime>, WarehouseError> {
        self.open_time_bound(symbol, interval, "MAX")
    }

    pub fn earliest_open_time(
        &self,
        symbol: &Symbol,
        interval: Interval,
    ) -> Result<Option<UtcDateTime>, WarehouseError> {
        self.open_time_bound(symbol, interval, "MIN")
    }

    fn open_time_bound(
        &self,
        symbol: &Symbol,
        interval: Interval,
        aggregate: &str,
    ) -> Result<Option<UtcDateTime>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let sql = format!(
            "SELECT strftime({aggregate}(open_time), '%Y-%m-%dT%H:%M:%SZ') \
             FROM candles WHERE symbol = ? AND interval = ?"
        );
        let value: Option<String> = connection.query_row(
            &sql,
            params![symbol.as_str(), interval.as_str()],
            |row| row.get(0),
        )?;

        value
            .map(|text| {
                UtcDateTime::parse(&text)
                    .map_err(|error| WarehouseError::CorruptRow(error.to_string()))
            })
            .transpose()
    }

    pub fn count(&self, symbol: &Symbol, interval: Interval) -> Result<u64, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM candles WHERE symbol = ? AND interval = ?",
            params![symbol.as_str(), interval.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Candles in `[start, end]`, oldest first. The read surface for
    /// indicators, strategies, and the backtester.
    pub fn range(
        &self,
        symbol: &Symbol,
        interval: Interval,
        start: UtcDateTime,
        end: UtcDateTime,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let mut statement = connection.prepare(
            "SELECT symbol, interval, strftime(open_time, '%Y-%m-%dT%H:%M:%SZ'), \
             open, high, low, close, volume, quote_volume, trade_count, source, raw_payload \
             FROM candles \
             WHERE symbol = ? AND interval = ? \
               AND open_time >= TRY_CAST(? AS TIMESTAMP) \
               AND open_time <= TRY_CAST(? AS TIMESTAMP) \
             ORDER BY open_time ASC LIMIT ?",
        )?;

        let limit = limit.unwrap_or(usize::MAX).min(i64::MAX as usize) as i64;
        let rows = statement.query_map(
            params![
                symbol.as_str(),
                interval.as_str(),
                sql_timestamp(start),
                sql_timestamp(end),
                limit,
            ],
            read_raw_candle,
        )?;

        let mut candles = Vec::new();
        for row in rows {
            candles.push(raw_to_candle(row?)?);
        }
        Ok(candles)
    }

    pub fn coverage(
        &self,
        symbol: &Symbol,
        interval: Interval,
    ) -> Result<CoverageReport, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let (count, earliest, latest): (i64, Option<String>, Option<String>) = connection
            .query_row(
                "SELECT COUNT(*), \
                 strftime(MIN(open_time), '%Y-%m-%dT%H:%M:%SZ'), \
                 strftime(MAX(open_time), '%Y-%m-%dT%H:%M:%SZ') \
                 FROM candles WHERE symbol = ? AND interval = ?",
                params![symbol.as_str(), interval.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

        let parse = |value: Option<String>| {
            value
                .map(|text| {
                    UtcDateTime::parse(&text)
                        .map_err(|error| WarehouseError::CorruptRow(error.to_string()))
                })
                .transpose()
        };

        Ok(CoverageReport {
            symbol: symbol.clone(),
            interval,
            candle_count: count.max(0) as u64,
            earliest_open_time: parse(earliest)?,
            latest_open_time: parse(latest)?,
        })
    }

    /// Append a row to the sync log.
    pub fn record_sync_run(&self, record: &SyncRunRecord) -> Result<(), WarehouseError> {
        let _writer = self.writer();
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        connection.execute(
            "INSERT INTO sync_log (run_id, symbol, interval, kind, rows_written, status, detail, latency_ms) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.run_id,
                record.symbol.as_str(),
                record.interval.as_str(),
                record.kind.as_str(),
                record.rows_written as i64,
                if record.ok { "ok" } else { "error" },
                record.detail,
                record.latency_ms.map(|value| value as i64),
            ],
        )?;
        Ok(())
    }

    fn writer(&self) -> MutexGuard<'_, ()> {
        self.write_gate
            .lock()
            .expect("candle store writer gate is not poisoned")
    }
}

struct RawCandleRow {
    symbol: String,
    interval: String,
    open_time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    quote_volume: Option<f64>,
    trade_count: Option<i64>,
    source: String,
    raw_payload: Option<String>,
}

fn read_raw_candle(row: &::duckdb::Row<'_>) -> Result<RawCandleRow, ::duckdb::Error> {
    Ok(RawCandleRow {
        symbol: row.get(0)?,
        interval: row.get(1)?,
        open_time: row.get(2)?,
        open: row.get(3)?,
        high: row.get(4)?,
        low: row.get(5)?,
        close: row.get(6)?,
        volume: row.get(7)?,
        quote_volume: row.get(8)?,
        trade_count: row.get(9)?,
        source: row.get(10)?,
        raw_payload: row.get(11)?,
    })
}

fn raw_to_candle(raw: RawCandleRow) -> Result<Candle, WarehouseError> {
    let corrupt = |error: String| WarehouseError::CorruptRow(error);

    let symbol = Symbol::parse(&raw.symbol).map_err(|e| corrupt(e.to_string()))?;
    let interval: Interval = raw
        .interval
        .parse()
        .map_err(|e: barkeep_core::ValidationError| corrupt(e.to_string()))?;
    let open_time = UtcDateTime::parse(&raw.open_time).map_err(|e| corrupt(e.to_string()))?;
    let source: ProviderId = raw
        .source
        .parse()
        .map_err(|e: barkeep_core::ValidationError| corrupt(e.to_string()))?;

    Candle::new(
        symbol,
        interval,
        open_time,
        raw.open,
        raw.high,
        raw.low,
        raw.close,
        raw.volume,
        raw.quote_volume,
        raw.trade_count.map(|value| value.max(0) as u64),
        source,
        raw.raw_payload,
    )
    .map_err(|e| corrupt(e.to_string()))
}

fn upsert_row(connection: &Connection, candle: &Candle) -> Result<UpsertOutcome, WarehouseError> {
    // The existence probe only classifies the outcome; uniqueness is enforced
    // by the ON CONFLICT clause, and the caller holds the writer gate.
    let existing: i64 = connection.query_row(
        "SELECT COUNT(*) FROM candles WHERE symbol = ? AND interval = ? \
         AND open_time = TRY_CAST(? AS TIMESTAMP)",
        params![
            candle.symbol.as_str(),
            candle.interval.as_str(),
            sql_timestamp(candle.open_time),
        ],
        |row| row.get(0),
    )?;

    connection.execute(
        "INSERT INTO candles (symbol, interval, open_time, close_time, open, high, low, close, \
         volume, quote_volume, trade_count, source, raw_payload) \
         VALUES (?, ?, TRY_CAST(? AS TIMESTAMP), TRY_CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (symbol, interval, open_time) DO UPDATE SET \
         close_time = excluded.close_time, \
         open = excluded.open, \
         high = excluded.high, \
         low = excluded.low, \
         close = excluded.close, \
         volume = excluded.volume, \
         quote_volume = excluded.quote_volume, \
         trade_count = excluded.trade_count, \
         source = excluded.source, \
         raw_payload = excluded.raw_payload, \
         updated_at = CURRENT_TIMESTAMP",
        params![
            candle.symbol.as_str(),
            candle.interval.as_str(),
            sql_timestamp(candle.open_time),
            sql_timestamp(candle.close_time),
            candle.open,
            candle.high,
            candle.low,
            candle.close,
            candle.volume,
            candle.quote_volume,
            candle.trade_count.map(|value| value as i64),
            candle.source.as_str(),
            candle.raw_payload,
        ],
    )?;

    Ok(if existing > 0 {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Inserted
    })
}

/// Candle timestamps are whole seconds; RFC3339 minus the `T`/`Z` decorations
/// is exactly DuckDB's TIMESTAMP literal shape.
fn sql_timestamp(value: UtcDateTime) -> String {
    value
        .format_rfc3339()
        .replace('T', " ")
        .trim_end_matches('Z')
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> CandleStore {
        CandleStore::open(WarehouseConfig {
            home: dir.path().to_path_buf(),
            db_path: dir.path().join("warehouse.duckdb"),
            max_pool_size: 2,
        })
        .expect("store open")
    }

    fn hourly_candle(offset_hours: u64, close: f64) -> Candle {
        let base = UtcDateTime::parse("2024-01-01T00:00:00Z").expect("timestamp");
        let open_time = base
            .checked_add(std::time::Duration::from_secs(offset_hours * 3_600))
            .expect("open time");
        Candle::new(
            Symbol::parse("BTCUSDT").expect("symbol"),
            Interval::OneHour,
            open_time,
            close - 10.0,
            close + 20.0,
            close - 30.0,
            close,
            1_000.0,
            Some(42_000_000.0),
            None,
            ProviderId::Bybit,
            None,
        )
        .expect("valid candle")
    }

    #[test]
    fn upsert_is_idempotent_and_last_write_wins() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let symbol = Symbol::parse("BTCUSDT").expect("symbol");

        let first = hourly_candle(0, 42_000.0);
        assert_eq!(
            store.upsert(&first).expect("first write"),
            UpsertOutcome::Inserted
        );

        let refined = hourly_candle(0, 42_500.0);
        assert_eq!(
            store.upsert(&refined).expect("second write"),
            UpsertOutcome::Updated
        );

        assert_eq!(store.count(&symbol, Interval::OneHour).expect("count"), 1);
        let stored = store
            .latest(&symbol, Interval::OneHour)
            .expect("latest")
            .expect("candle present");
        assert_eq!(stored.close, 42_500.0);
    }

    #[test]
    fn range_returns_oldest_first_with_limit() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let symbol = Symbol::parse("BTCUSDT").expect("symbol");

        let candles: Vec<Candle> = (0..5).map(|hour| hourly_candle(hour, 42_000.0)).collect();
        let report = store.bulk_upsert(&candles, 2).expect("bulk write");
        assert_eq!(report.inserted, 5);
        assert_eq!(report.failed, 0);

        let start = UtcDateTime::parse("2024-01-01T00:00:00Z").expect("timestamp");
        let end = UtcDateTime::parse("2024-01-01T10:00:00Z").expect("timestamp");
        let rows = store
            .range(&symbol, Interval::OneHour, start, end, Some(3))
            .expect("range");

        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|pair| pair[0].open_time < pair[1].open_time));
        assert_eq!(rows[0].open_time, start);
    }

    #[test]
    fn latest_open_time_tracks_newest_row() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let symbol = Symbol::parse("BTCUSDT").expect("symbol");

        assert!(store
            .latest_open_time(&symbol, Interval::OneHour)
            .expect("empty query")
            .is_none());

        store
            .bulk_upsert(
                &[hourly_candle(0, 42_000.0), hourly_candle(3, 42_100.0)],
                100,
            )
            .expect("bulk write");

        let latest = store
            .latest_open_time(&symbol, Interval::OneHour)
            .expect("query")
            .expect("present");
        assert_eq!(latest.format_rfc3339(), "2024-01-01T03:00:00Z");

        let earliest = store
            .earliest_open_time(&symbol, Interval::OneHour)
            .expect("query")
            .expect("present");
        assert_eq!(earliest.format_rfc3339(), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn coverage_summarizes_pair() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let symbol = Symbol::parse("BTCUSDT").expect("symbol");

        let empty = store
            .coverage(&symbol, Interval::OneHour)
            .expect("coverage");
        assert_eq!(empty.candle_count, 0);
        assert!(empty.earliest_open_time.is_none());

        store
            .bulk_upsert(
                &[hourly_candle(0, 42_000.0), hourly_candle(1, 42_050.0)],
                100,
            )
            .expect("bulk write");

        let coverage = store
            .coverage(&symbol, Interval::OneHour)
            .expect("coverage");
        assert_eq!(coverage.candle_count, 2);
        assert_eq!(
            coverage
                .latest_open_time
                .expect("latest")
                .format_rfc3339(),
            "2024-01-01T01:00:00Z"
        );
    }

    #[test]
    fn sync_log_accepts_run_records() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);

        store
            .record_sync_run(&SyncRunRecord {
                run_id: String::from("run-0001"),
                symbol: Symbol::parse("BTCUSDT").expect("symbol"),
                interval: Interval::OneHour,
                kind: SyncRunKind::Backfill,
                rows_written: 48,
                ok: true,
                detail: None,
                latency_ms: Some(1_250),
            })
            .expect("log write");
    }
}
