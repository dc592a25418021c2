use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::{Candle, Interval, ProviderId, ProviderPolicy, Symbol, UtcDateTime};

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// Transport failure, upstream 5xx, or an open circuit; worth retrying.
    Unavailable,
    /// Provider explicitly rejected the request rate.
    RateLimited,
    /// The request itself can never succeed (bad interval, zero count).
    InvalidRequest,
    /// The whole response payload was unparseable.
    MalformedPayload,
    Internal,
}

/// Structured source error surfaced to the sync layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn malformed_payload(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::MalformedPayload,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::MalformedPayload => "source.malformed_payload",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Result of a ranged fetch, including what the adapter had to do to satisfy
/// provider limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeFetch {
    /// Parsed candles, oldest first.
    pub candles: Vec<Candle>,
    /// Effective start after any history-limit clamping.
    pub effective_start: UtcDateTime,
    /// True when the requested start predated the provider's allowed window.
    pub clamped: bool,
    /// Paginated requests issued for this range.
    pub requests_made: u32,
    /// Provider rows dropped as malformed.
    pub rows_skipped: u32,
}

pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Provider adapter contract.
///
/// Implementations own interval translation, symbol suffix conventions,
/// pagination, throttling, and retries; callers only see validated candles.
pub trait CandleSource: Send + Sync {
    fn id(&self) -> ProviderId;

    fn policy(&self) -> &ProviderPolicy;

    /// Fetch the most recent `count` bars. The newest bar may still be open;
    /// callers are expected to re-fetch and upsert it once closed.
    fn fetch_recent<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
        count: usize,
    ) -> SourceFuture<'a, Vec<Candle>>;

    /// Fetch all bars in `[start, end]`, issuing as many paginated requests as
    /// the provider requires. Starts older than the provider's history window
    /// are clamped upward and flagged on the result.
    fn fetch_range<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> SourceFuture<'a, RangeFetch>;
}
