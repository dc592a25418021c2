//! DuckDB-backed candle storage for barkeep.
//!
//! One `candles` table keyed by (symbol, interval, open_time) is the single
//! shared mutable resource of the whole system; everything writes through
//! idempotent upserts and everything downstream reads through `range`.

pub mod duckdb;
pub mod migrations;
mod store;
pub mod views;

use std::env;
use std::path::PathBuf;

use thiserror::Error;

pub use duckdb::{AccessMode, DuckDbConnectionManager, PooledConnection};
pub use store::{
    BulkUpsertReport, CandleStore, CoverageReport, SyncRunKind, SyncRunRecord, UpsertOutcome,
};

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("stored row failed validation: {0}")]
    CorruptRow(String),
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub home: PathBuf,
    pub db_path: PathBuf,
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let home = resolve_home();
        let db_path = home.join("warehouse.duckdb");
        Self {
            home,
            db_path,
            max_pool_size: 4,
        }
    }
}

fn resolve_home() -> PathBuf {
    if let Some(path) = env::var_os("BARKEEP_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".barkeep");
    }

    PathBuf::from(".barkeep")
}
