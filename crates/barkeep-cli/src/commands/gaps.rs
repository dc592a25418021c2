use serde_json::{json, Value};

use barkeep_core::UtcDateTime;
use barkeep_sync::GapDetector;
use barkeep_warehouse::CandleStore;

use crate::cli::GapsArgs;
use crate::error::CliError;

use super::{intervals_or_all, make_source, parse_symbol};

/// Dry-run gap report across symbols and intervals; writes nothing.
pub fn run(args: &GapsArgs, store: CandleStore) -> Result<Value, CliError> {
    if args.symbols.is_empty() {
        return Err(CliError::Command(String::from(
            "at least one symbol is required",
        )));
    }

    let source = make_source(args.provider);
    let intervals = intervals_or_all(&args.intervals)?;
    let detector = GapDetector::new(store);
    let now = UtcDateTime::now();

    let mut rows = Vec::new();
    for raw_symbol in &args.symbols {
        let symbol = parse_symbol(raw_symbol)?;
        for &interval in &intervals {
            let lookback = source.policy().max_lookback(interval);
            let gap = detector.detect(&symbol, interval, now, lookback)?;
            rows.push(json!({
                "symbol": symbol,
                "interval": interval,
                "kind": gap.kind,
                "missing_candles": gap.missing_candles,
                "start": gap.start,
                "end": gap.end,
            }));
        }
    }

    Ok(Value::Array(rows))
}
