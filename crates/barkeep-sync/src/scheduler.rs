use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use barkeep_core::{CandleSource, Symbol};
use barkeep_warehouse::{CandleStore, SyncRunKind, SyncRunRecord};

use crate::schedule::SyncSchedule;
use crate::stats::SyncStats;
use crate::SyncError;

/// Pause between symbols within one sweep, to spread provider load.
const SYMBOL_DELAY: Duration = Duration::from_millis(100);
/// Sleep after a tick-level failure before the loop tries again.
const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Steady-state polling loop for one (source, interval) pair.
///
/// The loop only ever exits on shutdown: per-symbol failures are logged and
/// the sweep continues, tick-level failures back off and retry.
pub struct SchedulerLoop {
    store: CandleStore,
    source: Arc<dyn CandleSource>,
    stats: Arc<SyncStats>,
    schedule: SyncSchedule,
    symbols: Vec<Symbol>,
    shutdown: watch::Receiver<bool>,
}

impl SchedulerLoop {
    pub fn new(
        store: CandleStore,
        source: Arc<dyn CandleSource>,
        stats: Arc<SyncStats>,
        schedule: SyncSchedule,
        symbols: Vec<Symbol>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            source,
            stats,
            schedule,
            symbols,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let interval = self.schedule.interval;
        info!(
            interval = %interval,
            symbols = self.symbols.len(),
            period_secs = self.schedule.poll_period_secs,
            "interval loop started"
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let delay = match self.tick().await {
                Ok(synced) => {
                    self.stats.record_interval_sync(interval);
                    if synced > 0 {
                        debug!(interval = %interval, synced, total = self.symbols.len(), "sweep complete");
                    }
                    self.schedule.poll_period()
                }
                Err(error) => {
                    self.stats.record_error();
                    warn!(interval = %interval, "tick failed, backing off: {error}");
                    ERROR_BACKOFF
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(interval = %interval, "interval loop stopped");
    }

    /// One sweep over all symbols. Only infrastructure-level failures bubble
    /// up; a single symbol's trouble never blocks the rest.
    pub async fn tick(&self) -> Result<usize, SyncError> {
        let interval = self.schedule.interval;
        let mut synced = 0_usize;

        for (index, symbol) in self.symbols.iter().enumerate() {
            match self.sync_symbol(symbol).await {
                Ok(written) => {
                    if written > 0 {
                        synced += 1;
                    }
                }
                Err(error) => {
                    self.stats.record_error();
                    warn!(symbol = %symbol, interval = %interval, "symbol sync failed: {error}");
                }
            }

            if index + 1 < self.symbols.len() {
                tokio::time::sleep(SYMBOL_DELAY).await;
            }
        }

        Ok(synced)
    }

    async fn sync_symbol(&self, symbol: &Symbol) -> Result<u64, SyncError> {
        let interval = self.schedule.interval;
        let started = Instant::now();

        self.stats.record_api_calls(1);
        let candles = self
            .source
            .fetch_recent(symbol, interval, self.schedule.bars_per_poll)
            .await?;

        if candles.is_empty() {
            return Ok(0);
        }

        let report = self.store.bulk_upsert(&candles, 500)?;
        self.stats.record_candles(report.written());

        if report.written() > 0 {
            let record = SyncRunRecord {
                run_id: Uuid::new_v4().to_string(),
                symbol: symbol.clone(),
                interval,
                kind: SyncRunKind::Live,
                rows_written: report.written(),
                ok: report.failed == 0,
                detail: (report.failed > 0).then(|| format!("{} rows skipped", report.failed)),
                latency_ms: Some(started.elapsed().as_millis() as u64),
            };
            if let Err(error) = self.store.record_sync_run(&record) {
                warn!("failed to append sync log: {error}");
            }
        }

        Ok(report.written())
    }
}
