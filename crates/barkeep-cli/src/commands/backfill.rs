use std::sync::Arc;

use serde_json::{json, Value};

use barkeep_core::UtcDateTime;
use barkeep_sync::{analyze_gap, BackfillExecutor, SyncStats, DEFAULT_MAX_FILLABLE};
use barkeep_warehouse::CandleStore;

use crate::cli::BackfillArgs;
use crate::error::CliError;

use super::{make_source, parse_interval, parse_symbol, parse_timestamp};

/// One-shot fill of `[start, end]`, treating `start` as if it were the last
/// stored bar so the standard gap math applies.
pub async fn run(args: &BackfillArgs, store: CandleStore) -> Result<Value, CliError> {
    let symbol = parse_symbol(&args.symbol)?;
    let interval = parse_interval(&args.interval)?;
    let start = parse_timestamp(&args.start)?;
    let end = match &args.end {
        Some(raw) => parse_timestamp(raw)?,
        None => UtcDateTime::now(),
    };

    if end <= start {
        return Err(CliError::Command(String::from(
            "--start must be before --end",
        )));
    }

    let source = make_source(args.provider);
    let lookback = source.policy().max_lookback(interval);
    let gap = analyze_gap(Some(start), interval, end, lookback, DEFAULT_MAX_FILLABLE);

    if !gap.needs_fill() {
        return Ok(json!({
            "symbol": symbol,
            "interval": interval,
            "gap": gap,
            "rows_written": 0,
        }));
    }

    let stats = Arc::new(SyncStats::new());
    let executor = BackfillExecutor::new(store.clone(), source, Arc::clone(&stats));
    let report = executor.fill(&symbol, interval, &gap).await?;

    let count = store.count(&symbol, interval)?;
    Ok(json!({
        "symbol": symbol,
        "interval": interval,
        "gap": gap,
        "report": report,
        "stored_candles": count,
    }))
}
