//! Candle synchronization engine for barkeep.
//!
//! The pieces compose leaves-first: the pure gap detector reads store state,
//! the backfill executor closes detected gaps through a `CandleSource`, the
//! scheduler loops keep each interval fresh, and the coordinator wires it all
//! together with one supervised task group.

pub mod backfill;
pub mod coordinator;
mod error;
pub mod gap;
pub mod schedule;
pub mod scheduler;
pub mod stats;

pub use backfill::{BackfillConfig, BackfillExecutor, BackfillReport};
pub use coordinator::{CoordinatorOptions, MinHistory, SyncCoordinator, SyncFeed};
pub use error::SyncError;
pub use gap::{analyze_gap, GapDetector, GapInfo, GapKind, DEFAULT_MAX_FILLABLE};
pub use schedule::SyncSchedule;
pub use scheduler::SchedulerLoop;
pub use stats::{HealthReport, StatsSnapshot, SyncStats};
