mod backfill;
mod bars;
mod coverage;
mod gaps;
mod run;

use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;

use barkeep_core::{
    BybitAdapter, CandleSource, Interval, Symbol, UtcDateTime, YahooFuturesAdapter,
};
use barkeep_warehouse::{CandleStore, WarehouseConfig};

use crate::cli::{Cli, Command, ProviderArg};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<Value, CliError> {
    match &cli.command {
        Command::Run(args) => run::run(args, open_store(cli)?).await,
        Command::Backfill(args) => backfill::run(args, open_store(cli)?).await,
        Command::Gaps(args) => gaps::run(args, open_store(cli)?),
        Command::Bars(args) => bars::run(args, open_store(cli)?),
        Command::Coverage(args) => coverage::run(args, open_store(cli)?),
    }
}

fn open_store(cli: &Cli) -> Result<CandleStore, CliError> {
    let mut config = WarehouseConfig::default();
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }
    Ok(CandleStore::open(config)?)
}

fn parse_symbol(input: &str) -> Result<Symbol, CliError> {
    Ok(Symbol::parse(input)?)
}

fn parse_interval(input: &str) -> Result<Interval, CliError> {
    Ok(Interval::from_str(input)?)
}

fn parse_timestamp(input: &str) -> Result<UtcDateTime, CliError> {
    Ok(UtcDateTime::parse(input)?)
}

fn make_source(provider: ProviderArg) -> Arc<dyn CandleSource> {
    match provider {
        ProviderArg::Bybit => Arc::new(BybitAdapter::new()),
        ProviderArg::Yahoo => Arc::new(YahooFuturesAdapter::new()),
    }
}

fn intervals_or_all(inputs: &[String]) -> Result<Vec<Interval>, CliError> {
    if inputs.is_empty() {
        return Ok(Interval::ALL.to_vec());
    }
    inputs.iter().map(|input| parse_interval(input)).collect()
}
