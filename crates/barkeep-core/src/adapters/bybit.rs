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

const DEFAULT_BASE_URL: &str = "https://api.bybit.com";
const TESTNET_BASE_URL: &str = "https://api-testnet.bybit.com";

/// Bybit v5 kline adapter for linear perpetuals.
///
/// Kline rows arrive newest-first as string arrays:
/// `[startTimeMs, open, high, low, close, volume, turnover]`.
#[derive(Clone)]
pub struct BybitAdapter {
    base_url: String,
    http_client: Arc<dyn HttpClient>,
    policy: ProviderPolicy,
    retry: RetryConfig,
    gate: RequestGate,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl BybitAdapter {
    pub fn new() -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::new()))
    }

    pub fn testnet() -> Self {
        let mut adapter = Self::new();
        adapter.base_url = String::from(TESTNET_BASE_URL);
        adapter
    }

    pub fn with_http_client(http_client: Arc<dyn HttpClient>) -> Self {
        let policy = ProviderPolicy::bybit_default();
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

    pub fn with_circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    fn kline_url(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
        start: Option<UtcDateTime>,
        end: Option<UtcDateTime>,
    ) -> String {
        let mut url = format!(
            "{}/v5/market/kline?category=linear&symbol={}&interval={}&limit={}",
            self.base_url,
            urlencoding::encode(symbol.as_str()),
            interval_code(interval),
            limit,
        );
        if let Some(start) = start {
            url.push_str(&format!("&start={}", start.unix_millis()));
        }
        if let Some(end) = end {
            url.push_str(&format!("&end={}", end.unix_millis()));
        }
        url
    }

    async fn fetch_page(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
        start: Option<UtcDateTime>,
        end: Option<UtcDateTime>,
    ) -> Result<KlinePage, SourceError> {
        let url = self.kline_url(symbol, interval, limit, start, end);
        let body = self.execute_with_retry(&url).await?;
        parse_kline_page(symbol, interval, &body)
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
                        "bybit request failed, backing off: {}",
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
                "bybit circuit breaker is open; skipping upstream call",
            ));
        }

        let _permit = self.gate.acquire().await;
        let request = HttpRequest::get(url)
            .with_timeout_ms(self.policy.request_timeout.as_millis() as u64);

        let response = self.http_client.execute(request).await.map_err(|error| {
            self.circuit_breaker.record_failure();
            if error.retryable() {
                SourceError::unavailable(format!("bybit transport error: {}", error.message()))
            } else {
                SourceError::internal(format!("bybit transport error: {}", error.message()))
            }
        })?;

        if !response.is_success() {
            self.circuit_breaker.record_failure();
            if response.status == 429 {
                return Err(SourceError::rate_limited("bybit returned status 429"));
            }
            if self.retry.should_retry_status(response.status) {
                return Err(SourceError::unavailable(format!(
                    "bybit upstream returned status {}",
                    response.status
                )));
            }
            return Err(SourceError::internal(format!(
                "bybit upstream returned status {}",
                response.status
            )));
        }

        self.circuit_breaker.record_success();
        Ok(response.body)
    }
}

impl Default for BybitAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CandleSource for BybitAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Bybit
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
                    "bybit kline request count must be greater than zero",
                ));
            }

            let limit = count.min(self.policy.page_size);
            let page = self.fetch_page(symbol, interval, limit, None, None).await?;
            Ok(page.candles)
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
                    "bybit range fetch requires start < end",
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
                    "range start predates bybit history window, clamping"
                );
            }

            // Bound internal paging by the window size so a bad cursor can
            // never loop forever.
            let window_secs = end.seconds_since(effective_start);
            let expected_bars = (window_secs / interval.duration_secs()).max(1) as usize;
            let max_pages = expected_bars.div_ceil(self.policy.page_size) + 1;

            let mut candles: Vec<Candle> = Vec::new();
            let mut rows_skipped = 0_u32;
            let mut requests_made = 0_u32;
            let mut cursor_end = end;

            for page_index in 0..max_pages {
                let page = self
                    .fetch_page(
                        symbol,
                        interval,
                        self.policy.page_size,
                        Some(effective_start),
                        Some(cursor_end),
                    )
                    .await?;
                requests_made += 1;
                rows_skipped += page.rows_skipped;

                if page.candles.is_empty() {
                    break;
                }

                let oldest = page.candles[0].open_time;
                for candle in page.candles {
                    if candle.open_time >= effective_start && candle.open_time <= end {
                        candles.push(candle);
                    }
                }

                if oldest <= effective_start {
                    break;
                }

                let Some(next_end) = oldest.checked_sub(Duration::from_millis(1)) else {
                    break;
                };
                cursor_end = next_end;

                if page_index + 1 < max_pages {
                    tokio::time::sleep(self.policy.page_delay).await;
                }
            }

            candles.sort_by_key(|candle| candle.open_time);
            candles.dedup_by_key(|candle| candle.open_time);

            Ok(RangeFetch {
                candles,
                effective_start,
                clamped,
                requests_made,
                rows_skipped,
            })
        })
    }
}

#[derive(Debug)]
struct KlinePage {
    /// Oldest first.
    candles: Vec<Candle>,
    rows_skipped: u32,
}

#[derive(Debug, Deserialize)]
struct KlineEnvelope {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    #[serde(default)]
    result: Option<KlineResult>,
}

#[derive(Debug, Default, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<String>>,
}

fn parse_kline_page(
    symbol: &Symbol,
    interval: Interval,
    body: &str,
) -> Result<KlinePage, SourceError> {
    let envelope: KlineEnvelope = serde_json::from_str(body).map_err(|error| {
        SourceError::malformed_payload(format!("bybit kline payload unparseable: {error}"))
    })?;

    match envelope.ret_code {
        0 => {}
        10006 | 10018 => {
            return Err(SourceError::rate_limited(format!(
                "bybit rate limit: {}",
                envelope.ret_msg
            )))
        }
        10001 => {
            return Err(SourceError::invalid_request(format!(
                "bybit rejected request: {}",
                envelope.ret_msg
            )))
        }
        other => {
            return Err(SourceError::unavailable(format!(
                "bybit error {other}: {}",
                envelope.ret_msg
            )))
        }
    }

    let rows = envelope.result.unwrap_or_default().list;
    let mut candles = Vec::with_capacity(rows.len());
    let mut rows_skipped = 0_u32;

    for row in &rows {
        match parse_kline_row(symbol, interval, row) {
            Ok(candle) => candles.push(candle),
            Err(reason) => {
                rows_skipped += 1;
                warn!(symbol = %symbol, interval = %interval, reason, "skipping malformed bybit kline row");
            }
        }
    }

    // Bybit returns newest first; callers want oldest first.
    candles.reverse();

    Ok(KlinePage {
        candles,
        rows_skipped,
    })
}

fn parse_kline_row(
    symbol: &Symbol,
    interval: Interval,
    row: &[String],
) -> Result<Candle, String> {
    if row.len() < 6 {
        return Err(format!("expected at least 6 fields, got {}", row.len()));
    }

    let start_ms: i64 = row[0]
        .parse()
        .map_err(|_| format!("bad start time '{}'", row[0]))?;
    let open_time =
        UtcDateTime::from_unix_millis(start_ms).map_err(|error| error.to_string())?;

    let open = parse_price(&row[1], "open")?;
    let high = parse_price(&row[2], "high")?;
    let low = parse_price(&row[3], "low")?;
    let close = parse_price(&row[4], "close")?;
    let volume = parse_price(&row[5], "volume")?;
    let turnover = row.get(6).and_then(|value| value.parse::<f64>().ok());

    Candle::new(
        symbol.clone(),
        interval,
        open_time,
        open,
        high,
        low,
        close,
        volume,
        turnover,
        None,
        ProviderId::Bybit,
        serde_json::to_string(row).ok(),
    )
    .map_err(|error| error.to_string())
}

fn parse_price(value: &str, field: &str) -> Result<f64, String> {
    value
        .parse::<f64>()
        .map_err(|_| format!("bad {field} '{value}'"))
}

const fn interval_code(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMinute => "1",
        Interval::FiveMinutes => "5",
        Interval::FifteenMinutes => "15",
        Interval::OneHour => "60",
        Interval::FourHours => "240",
        Interval::OneDay => "D",
        Interval::OneWeek => "W",
    }
}
