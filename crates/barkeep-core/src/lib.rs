//! Core contracts for barkeep.
//!
//! This crate contains:
//! - Canonical domain models and validation
//! - Provider identifiers and per-provider policies
//! - The `CandleSource` trait and provider adapters
//! - Transport, throttling, retry, and circuit-breaker plumbing

pub mod adapters;
pub mod circuit_breaker;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod provider_policy;
pub mod retry;
pub mod source;
pub mod throttling;

pub use adapters::{
    from_provider_symbol, to_provider_symbol, BybitAdapter, YahooFuturesAdapter,
};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use data_source::{CandleSource, RangeFetch, SourceError, SourceErrorKind, SourceFuture};
pub use domain::{Candle, Interval, Symbol, UtcDateTime};
pub use error::{CoreError, ValidationError};
pub use http_client::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, NoopHttpClient,
    ReqwestHttpClient,
};
pub use provider_policy::{BackoffPolicy, ProviderPolicy};
pub use retry::{Backoff, RetryConfig};
pub use source::ProviderId;
pub use throttling::{RequestGate, RequestPermit};
