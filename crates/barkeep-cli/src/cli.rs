//! CLI argument definitions for barkeep.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Start the sync daemon (gap check, then live loops) |
//! | `backfill` | One-shot gap fill for a symbol/interval |
//! | `gaps` | Dry-run gap report, no writes |
//! | `bars` | Query stored candles |
//! | `coverage` | Per-pair storage coverage |

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// barkeep - OHLCV candle synchronization daemon and warehouse tools.
///
/// Keeps a DuckDB candle store consistent for crypto perpetuals (Bybit) and
/// CME micro futures (Yahoo Finance), detecting and backfilling gaps and
/// polling newly closed bars per interval.
#[derive(Debug, Parser)]
#[command(name = "barkeep", version, about = "OHLCV candle sync daemon")]
pub struct Cli {
    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Warehouse database file (defaults to $BARKEEP_HOME/warehouse.duckdb).
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format for terminal display.
    Table,
    /// Single JSON document.
    Json,
}

/// Provider selector for commands that talk to an upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    /// Bybit v5 linear kline endpoint.
    Bybit,
    /// Yahoo Finance chart endpoint (futures, `=F` suffix applied).
    Yahoo,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the sync daemon until interrupted.
    Run(RunArgs),
    /// Fill one gap and exit.
    Backfill(BackfillArgs),
    /// Report gaps without writing anything.
    Gaps(GapsArgs),
    /// Read stored candles.
    Bars(BarsArgs),
    /// Show storage coverage per (symbol, interval).
    Coverage(CoverageArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Crypto perpetual symbols synced from Bybit.
    #[arg(long, value_delimiter = ',', default_value = "BTCUSDT,ETHUSDT")]
    pub crypto_symbols: Vec<String>,

    /// Futures root symbols synced from Yahoo (no =F suffix).
    #[arg(long, value_delimiter = ',')]
    pub futures_symbols: Vec<String>,

    /// Skip the startup gap-check-and-fill pass.
    #[arg(long, default_value_t = false)]
    pub skip_gap_check: bool,

    /// Minimum stored candles per futures (symbol, interval) before the
    /// daemon considers history sufficient.
    #[arg(long)]
    pub min_candles: Option<u64>,

    /// Use the Bybit testnet endpoint.
    #[arg(long, default_value_t = false)]
    pub testnet: bool,
}

#[derive(Debug, Args)]
pub struct BackfillArgs {
    /// Symbol to backfill.
    pub symbol: String,

    /// Candle interval (1m, 5m, 15m, 1h, 4h, 1d, 1w).
    #[arg(long)]
    pub interval: String,

    /// Range start, RFC3339 UTC (e.g. 2024-01-01T00:00:00Z).
    #[arg(long)]
    pub start: String,

    /// Range end, RFC3339 UTC; defaults to now.
    #[arg(long)]
    pub end: Option<String>,

    #[arg(long, value_enum, default_value_t = ProviderArg::Bybit)]
    pub provider: ProviderArg,
}

#[derive(Debug, Args)]
pub struct GapsArgs {
    /// Symbols to inspect.
    #[arg(value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Intervals to inspect; defaults to all supported.
    #[arg(long, value_delimiter = ',')]
    pub intervals: Vec<String>,

    #[arg(long, value_enum, default_value_t = ProviderArg::Bybit)]
    pub provider: ProviderArg,
}

#[derive(Debug, Args)]
pub struct BarsArgs {
    /// Symbol to read.
    pub symbol: String,

    /// Candle interval.
    #[arg(long)]
    pub interval: String,

    /// Range start, RFC3339 UTC; defaults to 24h ago.
    #[arg(long)]
    pub start: Option<String>,

    /// Range end, RFC3339 UTC; defaults to now.
    #[arg(long)]
    pub end: Option<String>,

    /// Maximum rows returned.
    #[arg(long, default_value_t = 100)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct CoverageArgs {
    /// Symbol to summarize.
    pub symbol: String,

    /// Single interval; defaults to all supported.
    #[arg(long)]
    pub interval: Option<String>,
}
