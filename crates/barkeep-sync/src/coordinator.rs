use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use barkeep_core::{CandleSource, Symbol, UtcDateTime};
use barkeep_warehouse::CandleStore;

use crate::backfill::{BackfillConfig, BackfillExecutor};
use crate::gap::{GapDetector, GapKind, DEFAULT_MAX_FILLABLE};
use crate::schedule::SyncSchedule;
use crate::stats::{HealthReport, StatsSnapshot, SyncStats};
use crate::SyncError;

/// Minimum stored history required before downstream consumers may rely on a
/// pair; enforced on startup with a few retry rounds.
#[derive(Debug, Clone, Copy)]
pub struct MinHistory {
    pub min_candles: u64,
    pub max_rounds: u32,
}

impl Default for MinHistory {
    fn default() -> Self {
        Self {
            min_candles: 100,
            max_rounds: 3,
        }
    }
}

/// One provider plus the symbols and schedules it serves.
#[derive(Clone)]
pub struct SyncFeed {
    pub source: Arc<dyn CandleSource>,
    pub symbols: Vec<Symbol>,
    pub schedules: Vec<SyncSchedule>,
    pub min_history: Option<MinHistory>,
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorOptions {
    pub check_gaps_on_start: bool,
    pub max_fillable: u64,
    pub shutdown_timeout: Duration,
    pub backfill: BackfillConfig,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            check_gaps_on_start: true,
            max_fillable: DEFAULT_MAX_FILLABLE,
            shutdown_timeout: Duration::from_secs(10),
            backfill: BackfillConfig::default(),
        }
    }
}

/// Top-level facade: owns the feeds, runs the startup gap pass, and
/// supervises one scheduler loop per (feed, interval) in a single task group.
pub struct SyncCoordinator {
    store: CandleStore,
    feeds: Vec<SyncFeed>,
    options: CoordinatorOptions,
    stats: Arc<SyncStats>,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl SyncCoordinator {
    /// Validates configuration up front; these are the only errors allowed to
    /// prevent the coordinator from starting.
    pub fn new(
        store: CandleStore,
        feeds: Vec<SyncFeed>,
        options: CoordinatorOptions,
    ) -> Result<Self, SyncError> {
        if feeds.is_empty() {
            return Err(SyncError::InvalidConfig(
                "no sync feeds configured".to_owned(),
            ));
        }
        for feed in &feeds {
            if feed.symbols.is_empty() {
                return Err(SyncError::InvalidConfig(format!(
                    "feed '{}' has an empty symbol list",
                    feed.source.id()
                )));
            }
            if feed.schedules.is_empty() {
                return Err(SyncError::InvalidConfig(format!(
                    "feed '{}' has no schedules",
                    feed.source.id()
                )));
            }
            for schedule in &feed.schedules {
                schedule.validate()?;
            }
        }

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            store,
            feeds,
            options,
            stats: Arc::new(SyncStats::new()),
            shutdown,
            tasks: JoinSet::new(),
        })
    }

    /// Run the startup gap pass (when enabled), then spawn the steady-state
    /// loops. Returns once the loops are running.
    pub async fn start(&mut self) -> Result<(), SyncError> {
        self.stats.mark_started();

        if self.options.check_gaps_on_start {
            self.startup_pass().await;
        }

        for feed in &self.feeds {
            for schedule in &feed.schedules {
                let loop_task = crate::scheduler::SchedulerLoop::new(
                    self.store.clone(),
                    Arc::clone(&feed.source),
                    Arc::clone(&self.stats),
                    *schedule,
                    feed.symbols.clone(),
                    self.shutdown.subscribe(),
                );
                self.tasks.spawn(loop_task.run());
            }
        }

        info!(loops = self.tasks.len(), "sync coordinator started");
        Ok(())
    }

    /// Gap-check and fill every (symbol, interval) pair before live polling
    /// assumes continuity. Individual failures are logged and skipped; the
    /// pass itself never aborts startup.
    async fn startup_pass(&self) {
        info!("running startup gap check");
        let detector =
            GapDetector::new(self.store.clone()).with_max_fillable(self.options.max_fillable);

        for feed in &self.feeds {
            let executor = BackfillExecutor::new(
                self.store.clone(),
                Arc::clone(&feed.source),
                Arc::clone(&self.stats),
            )
            .with_config(self.options.backfill);

            for symbol in &feed.symbols {
                for schedule in &feed.schedules {
                    let interval = schedule.interval;
                    let now = UtcDateTime::now();
                    let lookback = feed.source.policy().max_lookback(interval);

                    let gap = match detector.detect(symbol, interval, now, lookback) {
                        Ok(gap) => gap,
                        Err(err) => {
                            self.stats.record_error();
                            error!(symbol = %symbol, interval = %interval, "gap check failed: {err}");
                            continue;
                        }
                    };

                    match gap.kind {
                        GapKind::UpToDate => continue,
                        GapKind::TooLarge => {
                            self.stats.record_gap_found();
                            warn!(
                                symbol = %symbol,
                                interval = %interval,
                                missing = gap.missing_candles,
                                "gap too large to auto-fill"
                            );
                            continue;
                        }
                        GapKind::Behind | GapKind::FullHistory => {}
                    }

                    self.stats.record_gap_found();
                    warn!(
                        symbol = %symbol,
                        interval = %interval,
                        missing = gap.missing_candles,
                        "gap detected, backfilling"
                    );

                    match executor.fill(symbol, interval, &gap).await {
                        Ok(report) if report.rows_written > 0 => {
                            self.stats.record_gap_filled();
                            info!(
                                symbol = %symbol,
                                interval = %interval,
                                rows = report.rows_written,
                                "gap filled"
                            );
                        }
                        Ok(_) => {
                            warn!(symbol = %symbol, interval = %interval, "gap fill wrote no rows");
                        }
                        Err(err) => {
                            self.stats.record_error();
                            error!(symbol = %symbol, interval = %interval, "gap fill failed: {err}");
                        }
                    }

                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }

            if let Some(min_history) = feed.min_history {
                for symbol in &feed.symbols {
                    for schedule in &feed.schedules {
                        if let Err(err) = executor
                            .ensure_min_history(
                                symbol,
                                schedule.interval,
                                min_history.min_candles,
                                min_history.max_rounds,
                            )
                            .await
                        {
                            self.stats.record_error();
                            error!(
                                symbol = %symbol,
                                interval = %schedule.interval,
                                "minimum-history check failed: {err}"
                            );
                        }
                    }
                }
            }
        }
    }

    /// Signal every loop to stop and wait for them, bounded. Loops observe the
    /// signal at their next suspension point; in-flight fetches finish or time
    /// out naturally.
    pub async fn stop(&mut self) {
        info!("stopping sync coordinator");
        let _ = self.shutdown.send(true);

        let drained = tokio::time::timeout(self.options.shutdown_timeout, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!("shutdown timeout exceeded, aborting remaining loops");
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        self.stats.mark_stopped();
        info!("sync coordinator stopped");
    }

    pub fn store(&self) -> &CandleStore {
        &self.store
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn health(&self) -> HealthReport {
        self.stats.health()
    }

    pub fn active_loops(&self) -> usize {
        self.tasks.len()
    }
}
