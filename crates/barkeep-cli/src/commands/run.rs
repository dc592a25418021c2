use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use barkeep_core::{BybitAdapter, YahooFuturesAdapter};
use barkeep_sync::{
    CoordinatorOptions, MinHistory, SyncCoordinator, SyncFeed, SyncSchedule,
};
use barkeep_warehouse::CandleStore;

use crate::cli::RunArgs;
use crate::error::CliError;

use super::parse_symbol;

/// Start the coordinator and hold until Ctrl-C, then stop cleanly and emit
/// the final stats.
pub async fn run(args: &RunArgs, store: CandleStore) -> Result<Value, CliError> {
    let mut feeds = Vec::new();

    if !args.crypto_symbols.is_empty() {
        let adapter = if args.testnet {
            BybitAdapter::testnet()
        } else {
            BybitAdapter::new()
        };
        feeds.push(SyncFeed {
            source: Arc::new(adapter),
            symbols: args
                .crypto_symbols
                .iter()
                .map(|raw| parse_symbol(raw))
                .collect::<Result<_, _>>()?,
            schedules: SyncSchedule::default_crypto(),
            min_history: None,
        });
    }

    if !args.futures_symbols.is_empty() {
        feeds.push(SyncFeed {
            source: Arc::new(YahooFuturesAdapter::new()),
            symbols: args
                .futures_symbols
                .iter()
                .map(|raw| parse_symbol(raw))
                .collect::<Result<_, _>>()?,
            schedules: SyncSchedule::default_futures(),
            min_history: args.min_candles.map(|min_candles| MinHistory {
                min_candles,
                ..MinHistory::default()
            }),
        });
    }

    let options = CoordinatorOptions {
        check_gaps_on_start: !args.skip_gap_check,
        ..CoordinatorOptions::default()
    };

    let mut coordinator = SyncCoordinator::new(store, feeds, options)?;
    coordinator.start().await?;

    info!("sync daemon running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    coordinator.stop().await;

    let stats = coordinator.stats();
    let health = coordinator.health();
    Ok(json!({ "stats": stats, "health": health }))
}
