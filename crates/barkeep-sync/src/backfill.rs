use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use barkeep_core::{CandleSource, Interval, Symbol, UtcDateTime};
use barkeep_warehouse::{CandleStore, SyncRunKind, SyncRunRecord};

use crate::gap::{GapInfo, GapKind};
use crate::stats::SyncStats;
use crate::SyncError;

/// Bounds on how much work a single gap fill may do.
#[derive(Debug, Clone, Copy)]
pub struct BackfillConfig {
    /// Hard cap on paginated requests per gap.
    pub max_requests: u32,
    /// Retries per failed page before that page is abandoned.
    pub page_retries: u32,
    /// Delay between pages.
    pub page_delay: Duration,
    /// Rows per storage batch.
    pub batch_size: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            max_requests: 50,
            page_retries: 2,
            page_delay: Duration::from_millis(200),
            batch_size: 500,
        }
    }
}

/// Outcome of one gap fill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub rows_written: u64,
    pub pages_attempted: u32,
    pub pages_failed: u32,
    pub clamped: bool,
}

/// Drives bounded, resumable fetch+store cycles against one source.
pub struct BackfillExecutor {
    store: CandleStore,
    source: Arc<dyn CandleSource>,
    stats: Arc<SyncStats>,
    config: BackfillConfig,
}

impl BackfillExecutor {
    pub fn new(store: CandleStore, source: Arc<dyn CandleSource>, stats: Arc<SyncStats>) -> Self {
        Self {
            store,
            source,
            stats,
            config: BackfillConfig::default(),
        }
    }

    pub fn with_config(mut self, config: BackfillConfig) -> Self {
        self.config = config;
        self
    }

    /// Fill a detected gap page by page, newest window first.
    ///
    /// A failed page is retried a couple of times and then abandoned; the
    /// remaining pages still run. The fill never errors on provider trouble,
    /// it just reports fewer rows.
    pub async fn fill(
        &self,
        symbol: &Symbol,
        interval: Interval,
        gap: &GapInfo,
    ) -> Result<BackfillReport, SyncError> {
        match gap.kind {
            GapKind::UpToDate => return Ok(BackfillReport::default()),
            GapKind::TooLarge => {
                warn!(
                    symbol = %symbol,
                    interval = %interval,
                    missing = gap.missing_candles,
                    "gap exceeds auto-fill ceiling, leaving for manual backfill"
                );
                return Ok(BackfillReport::default());
            }
            GapKind::Behind | GapKind::FullHistory => {}
        }

        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let page_size = self.source.policy().page_size as u64;
        let pages_needed = gap.missing_candles.div_ceil(page_size.max(1)).max(1);
        let pages = pages_needed.min(u64::from(self.config.max_requests)) as u32;
        let window = Duration::from_secs(interval.duration_secs() * page_size);

        info!(
            symbol = %symbol,
            interval = %interval,
            missing = gap.missing_candles,
            pages,
            "filling gap {} -> {}",
            gap.start,
            gap.end
        );

        let mut report = BackfillReport::default();
        let mut sub_end = gap.end;

        for page in 0..pages {
            let sub_start = sub_end
                .checked_sub(window)
                .filter(|candidate| *candidate > gap.start)
                .unwrap_or(gap.start);

            report.pages_attempted += 1;
            match self
                .fetch_page_with_retries(symbol, interval, sub_start, sub_end)
                .await
            {
                Ok(fetch) => {
                    report.clamped |= fetch.clamped;
                    self.stats.record_api_calls(u64::from(fetch.requests_made));

                    let oldest = fetch.candles.first().map(|candle| candle.open_time);
                    let batch = self.store.bulk_upsert(&fetch.candles, self.config.batch_size)?;
                    report.rows_written += batch.written();
                    self.stats.record_candles(batch.written());

                    if fetch.clamped {
                        // The provider cannot serve anything older; stop paging.
                        break;
                    }
                    if fetch.candles.is_empty() {
                        debug!(symbol = %symbol, interval = %interval, "empty page, stopping fill");
                        break;
                    }
                    if oldest.is_some_and(|oldest| oldest <= gap.start) {
                        break;
                    }
                }
                Err(error) => {
                    report.pages_failed += 1;
                    self.stats.record_error();
                    warn!(
                        symbol = %symbol,
                        interval = %interval,
                        page,
                        "abandoning page after retries: {error}"
                    );
                }
            }

            if sub_start <= gap.start {
                break;
            }
            sub_end = sub_start
                .checked_sub(Duration::from_secs(1))
                .unwrap_or(gap.start);

            tokio::time::sleep(self.config.page_delay).await;
        }

        self.log_run(&run_id, symbol, interval, &report, started);
        Ok(report)
    }

    /// Startup check for newly added symbols: keep filling until the stored
    /// count reaches `min_count` or the rounds run out (sparse calendars can
    /// leave the first attempt short).
    pub async fn ensure_min_history(
        &self,
        symbol: &Symbol,
        interval: Interval,
        min_count: u64,
        max_rounds: u32,
    ) -> Result<u64, SyncError> {
        let mut count = self.store.count(symbol, interval)?;

        for round in 0..max_rounds {
            if count >= min_count {
                break;
            }

            let shortfall = min_count - count;
            let now = UtcDateTime::now();
            // Double the nominal span so weekends/holidays still leave enough
            // bars, bounded by what the provider can serve.
            let span = Duration::from_secs(interval.duration_secs() * shortfall * 2)
                .min(self.source.policy().max_lookback(interval));
            let gap = GapInfo {
                kind: GapKind::FullHistory,
                start: now.checked_sub(span).unwrap_or(now),
                end: now,
                missing_candles: shortfall,
            };

            debug!(
                symbol = %symbol,
                interval = %interval,
                round,
                count,
                min_count,
                "history below minimum, backfilling"
            );
            self.fill(symbol, interval, &gap).await?;
            count = self.store.count(symbol, interval)?;
        }

        if count < min_count {
            warn!(
                symbol = %symbol,
                interval = %interval,
                count,
                min_count,
                "minimum history still unmet after retry rounds"
            );
        }

        Ok(count)
    }

    async fn fetch_page_with_retries(
        &self,
        symbol: &Symbol,
        interval: Interval,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Result<barkeep_core::RangeFetch, SyncError> {
        let mut attempt = 0;
        loop {
            match self.source.fetch_range(symbol, interval, start, end).await {
                Ok(fetch) => return Ok(fetch),
                Err(error) if error.retryable() && attempt < self.config.page_retries => {
                    attempt += 1;
                    debug!(
                        symbol = %symbol,
                        interval = %interval,
                        attempt,
                        "page fetch failed, retrying: {error}"
                    );
                    tokio::time::sleep(self.config.page_delay).await;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    fn log_run(
        &self,
        run_id: &str,
        symbol: &Symbol,
        interval: Interval,
        report: &BackfillReport,
        started: Instant,
    ) {
        let record = SyncRunRecord {
            run_id: run_id.to_owned(),
            symbol: symbol.clone(),
            interval,
            kind: SyncRunKind::Backfill,
            rows_written: report.rows_written,
            ok: report.pages_failed == 0,
            detail: (report.pages_failed > 0)
                .then(|| format!("{} of {} pages failed", report.pages_failed, report.pages_attempted)),
            latency_ms: Some(started.elapsed().as_millis() as u64),
        };
        if let Err(error) = self.store.record_sync_run(&record) {
            warn!("failed to append sync log: {error}");
        }
    }
}
