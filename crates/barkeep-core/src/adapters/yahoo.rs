use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::data_source::{CandleSource, RangeFetch, SourceError, SourceFuture};
use crate::http_client::{HttpClient, HttpRequest, NoopHttpClient, ReqwestHttpClient};
use crate::retry::RetryConfig;
use crate::throttling::RequestGate;
use crate::{Candle, Interval, ProviderId, ProviderPolicy, Symbol, UtcDateTime};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Yahoo Finance chart adapter for CME micro futures (MGC, MCL, MES, MNQ).
///
/// The chart endpoint returns columnar arrays keyed by a shared timestamp
/// vector; individual entries may be null and are skipped. History depth is
/// hard-limited per granularity (minute bars only reach back days).
#[derive(Clone)]
pub struct YahooFuturesAdapter {
    base_url: String,
    http_client: Arc<dyn HttpClient>,
    policy: ProviderPolicy,
    retry: RetryConfig,
    gate: RequestGate,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl YahooFuturesAdapter {
    pub fn new() -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::new()))
    }

    pub fn with_http_client(http_client: Arc<dyn HttpClient>) -> Self {
        let policy = ProviderPolicy::yahoo_default();
        Self {
            base_url: String::from(DEFAULT_BASE_URL),
            http_client,
            retry: RetryConfig::from_policy(&policy.retry_backoff),
            gate: RequestGate::from_policy(&policy),
            policy,
            circuit_breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    /// Deterministic offline adapter for tests.
    pub fn offline() -> Self {
        Self::with_http_client(Arc::new(NoopHttpClient))
    }

    pub fn with_policy(mut self, policy: ProviderPolicy) -> Self {
        self.retry = RetryConfig::from_policy(&policy.retry_backoff);
        self.gate = RequestGate::from_policy(&policy);
        self.policy = policy;
        self
    }

    fn chart_url(
        &self,
        symbol: &Symbol,
        interval_code: &str,
        period1: i64,
        period2: i64,
    ) -> String {
        format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval={}&includePrePost=false&events=",
            self.base_url,
            urlencoding::encode(&to_provider_symbol(symbol)),
            period1,
            period2,
            interval_code,
        )
    }

    async fn fetch_window(
        &self,
        symbol: &Symbol,
        interval: Interval,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Result<ChartPage, SourceError> {
        let code = interval_code(interval)?;
        let url = self.chart_url(symbol, code, start.unix_seconds(), end.unix_seconds());
        let body = self.execute_with_retry(&url).await?;
        parse_chart_page(symbol, interval, &body)
    }

    async fn execute_with_retry(&self, url: &str) -> Result<String, SourceError> {
        let mut attempt: u32 = 0;
        loop {
            match self.execute_once(url).await {
                Ok(body) => return Ok(body),
                Err(error) if error.retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "yahoo request failed, backing off: {}",
                        error.message()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn execute_once(&self, url: &str) -> Result<String, SourceError> {
        if !self.circuit_breaker.allow_request() {
            return Err(SourceError::unavailable(
                "yahoo circuit breaker is open; skipping upstream call",
            ));
        }

        let _permit = self.gate.acquire().await;
        let request = HttpRequest::get(url)
            .with_timeout_ms(self.policy.request_timeout.as_millis() as u64);

        let response = self.http_client.execute(request).await.map_err(|error| {
            self.circuit_breaker.record_failure();
            if error.retryable() {
                SourceError::unavailable(format!("yahoo transport error: {}", error.message()))
            } else {
                SourceError::internal(format!("yahoo transport error: {}", error.message()))
            }
        })?;

        if !response.is_success() {
            self.circuit_breaker.record_failure();
            if response.status == 429 {
                return Err(SourceError::rate_limited("yahoo returned status 429"));
            }
            if self.retry.should_retry_status(response.status) {
                return Err(SourceError::unavailable(format!(
                    "yahoo upstream returned status {}",
                    response.status
                )));
            }
            return Err(SourceError::internal(format!(
                "yahoo upstream returned status {}",
                response.status
            )));
        }

        self.circuit_breaker.record_success();
        Ok(response.body)
    }
}

impl Default for YahooFuturesAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CandleSource for YahooFuturesAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Yahoo
    }

    fn policy(&self) -> &ProviderPolicy {
        &self.policy
    }

    fn fetch_recent<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
        count: usize,
    ) -> SourceFuture<'a, Vec<Candle>> {
        Box::pin(async move {
            if count == 0 {
                return Err(SourceError::invalid_request(
                    "yahoo chart request count must be greater than zero",
                ));
            }

            let end = UtcDateTime::now();
            let span = Duration::from_secs(interval.duration_secs() * count as u64);
            let lookback = self.policy.max_lookback(interval);
            let start = end
                .checked_sub(span.min(lookback))
                .ok_or_else(|| SourceError::internal("yahoo window underflow"))?;

            let page = self.fetch_window(symbol, interval, start, end).await?;
            let mut candles = page.candles;
            if candles.len() > count {
                candles.drain(..candles.len() - count);
            }
            Ok(candles)
        })
    }

    fn fetch_range<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> SourceFuture<'a, RangeFetch> {
        Box::pin(async move {
            if end <= start {
                return Err(SourceError::invalid_request(
                    "yahoo range fetch requires start < end",
                ));
            }

            let earliest_allowed = UtcDateTime::now()
                .checked_sub(self.policy.max_lookback(interval))
                .unwrap_or(start);
            let clamped = start < earliest_allowed;
            let effective_start = if clamped { earliest_allowed } else { start };
            if clamped {
                warn!(
                    symbol = %symbol,
                    interval = %interval,
                    requested = %start,
                    effective = %effective_start,
                    "range start predates yahoo history window, clamping"
                );
            }

            // The chart endpoint serves a whole window in one response; no
            // cursor paging needed.
            let page = self
                .fetch_window(symbol, interval, effective_start, end)
                .await?;

            let mut candles = page.candles;
            candles.retain(|candle| {
                candle.open_time >= effective_start && candle.open_time <= end
            });

            Ok(RangeFetch {
                candles,
                effective_start,
                clamped,
                requests_made: 1,
                rows_skipped: page.rows_skipped,
            })
        })
    }
}

/// Futures roots are quoted with a `=F` suffix on the provider side only.
pub fn to_provider_symbol(symbol: &Symbol) -> String {
    format!("{}=F", symbol.as_str())
}

/// Strip the provider suffix back off for storage.
pub fn from_provider_symbol(provider_symbol: &str) -> Result<Symbol, crate::ValidationError> {
    let trimmed = provider_symbol
        .strip_suffix("=F")
        .unwrap_or(provider_symbol);
    Symbol::parse(trimmed)
}

#[derive(Debug)]
struct ChartPage {
    /// Oldest first, as served.
    candles: Vec<Candle>,
    rows_skipped: u32,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

fn parse_chart_page(
    symbol: &Symbol,
    interval: Interval,
    body: &str,
) -> Result<ChartPage, SourceError> {
    let envelope: ChartEnvelope = serde_json::from_str(body).map_err(|error| {
        SourceError::malformed_payload(format!("yahoo chart payload unparseable: {error}"))
    })?;

    if let Some(error) = envelope.chart.error {
        return Err(SourceError::unavailable(format!(
            "yahoo chart error {}: {}",
            error.code, error.description
        )));
    }

    let Some(result) = envelope
        .chart
        .result
        .and_then(|mut results| (!results.is_empty()).then(|| results.remove(0)))
    else {
        return Ok(ChartPage {
            candles: Vec::new(),
            rows_skipped: 0,
        });
    };

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

    let mut candles = Vec::with_capacity(result.timestamp.len());
    let mut rows_skipped = 0_u32;

    for (index, ts) in result.timestamp.iter().enumerate() {
        match parse_chart_row(symbol, interval, *ts, index, &quote) {
            Ok(candle) => candles.push(candle),
            Err(reason) => {
                rows_skipped += 1;
                warn!(symbol = %symbol, interval = %interval, index, reason, "skipping malformed yahoo chart row");
            }
        }
    }

    candles.sort_by_key(|candle| candle.open_time);

    Ok(ChartPage {
        candles,
        rows_skipped,
    })
}

fn parse_chart_row(
    symbol: &Symbol,
    interval: Interval,
    ts_seconds: i64,
    index: usize,
    quote: &ChartQuote,
) -> Result<Candle, String> {
    let open_time = UtcDateTime::from_unix_millis(
        ts_seconds
            .checked_mul(1_000)
            .ok_or_else(|| format!("timestamp {ts_seconds} out of range"))?,
    )
    .map_err(|error| error.to_string())?;

    let open = pick(&quote.open, index).ok_or("null open")?;
    let high = pick(&quote.high, index).ok_or("null high")?;
    let low = pick(&quote.low, index).ok_or("null low")?;
    let close = pick(&quote.close, index).ok_or("null close")?;
    let volume = pick(&quote.volume, index).unwrap_or(0);

    Candle::new(
        symbol.clone(),
        interval,
        open_time,
        open,
        high,
        low,
        close,
        volume as f64,
        None,
        None,
        ProviderId::Yahoo,
        None,
    )
    .map_err(|error| error.to_string())
}

fn pick<T: Copy>(values: &[Option<T>], index: usize) -> Option<T> {
    values.get(index).copied().flatten()
}

fn interval_code(interval: Interval) -> Result<&'static str, SourceError> {
    match interval {
        Interval::OneMinute => Ok("1m"),
        Interval::FiveMinutes => Ok("5m"),
        Interval::FifteenMinutes => Ok("15m"),
        Interval::OneHour => Ok("60m"),
        Interval::OneDay => Ok("1d"),
        Interval::OneWeek => Ok("1wk"),
        // The chart API has no 4h granularity; resampling silently would lie
        // about bucket boundaries.
        Interval::FourHours => Err(SourceError::invalid_request(
            "yahoo chart does not serve 4h bars",
        )),
    }
}
