use thiserror::Error;

use barkeep_core::SourceError;
use barkeep_warehouse::WarehouseError;

/// Errors surfaced by the sync layer.
///
/// Only `InvalidConfig` is allowed to stop the coordinator from starting;
/// everything else is handled inside the loops and reported through stats.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync configuration invalid: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Source(#[from] SourceError),
}
