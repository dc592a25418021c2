use std::time::Duration;

use serde_json::{json, Value};

use barkeep_core::UtcDateTime;
use barkeep_warehouse::CandleStore;

use crate::cli::BarsArgs;
use crate::error::CliError;

use super::{parse_interval, parse_symbol, parse_timestamp};

/// Read stored candles oldest-first.
pub fn run(args: &BarsArgs, store: CandleStore) -> Result<Value, CliError> {
    if args.limit == 0 {
        return Err(CliError::Command(String::from(
            "--limit must be greater than zero",
        )));
    }

    let symbol = parse_symbol(&args.symbol)?;
    let interval = parse_interval(&args.interval)?;

    let end = match &args.end {
        Some(raw) => parse_timestamp(raw)?,
        None => UtcDateTime::now(),
    };
    let start = match &args.start {
        Some(raw) => parse_timestamp(raw)?,
        None => end
            .checked_sub(Duration::from_secs(24 * 3_600))
            .unwrap_or(end),
    };

    let candles = store.range(&symbol, interval, start, end, Some(args.limit))?;

    let rows: Vec<Value> = candles
        .iter()
        .map(|candle| {
            json!({
                "open_time": candle.open_time,
                "open": candle.open,
                "high": candle.high,
                "low": candle.low,
                "close": candle.close,
                "volume": candle.volume,
                "source": candle.source,
            })
        })
        .collect();

    Ok(Value::Array(rows))
}
