use serde_json::{json, Value};

use barkeep_core::Interval;
use barkeep_warehouse::CandleStore;

use crate::cli::CoverageArgs;
use crate::error::CliError;

use super::{parse_interval, parse_symbol};

/// Per-pair storage coverage: how many candles and over what span.
pub fn run(args: &CoverageArgs, store: CandleStore) -> Result<Value, CliError> {
    let symbol = parse_symbol(&args.symbol)?;
    let intervals: Vec<Interval> = match &args.interval {
        Some(raw) => vec![parse_interval(raw)?],
        None => Interval::ALL.to_vec(),
    };

    let mut rows = Vec::new();
    for interval in intervals {
        let coverage = store.coverage(&symbol, interval)?;
        rows.push(json!({
            "symbol": coverage.symbol,
            "interval": coverage.interval,
            "candle_count": coverage.candle_count,
            "earliest_open_time": coverage.earliest_open_time,
            "latest_open_time": coverage.latest_open_time,
        }));
    }

    Ok(Value::Array(rows))
}
