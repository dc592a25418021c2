use std::time::Duration;

use crate::{Interval, ProviderId};

const DAY_SECS: u64 = 86_400;

/// Static per-provider limits: pagination, quotas, retry shape, and how far
/// back each interval's history is available.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    /// Bars per paginated request.
    pub page_size: usize,
    /// Delay between paginated requests within one range fetch.
    pub page_delay: Duration,
    pub max_concurrency: usize,
    pub quota_window: Duration,
    pub quota_limit: u32,
    pub request_timeout: Duration,
    pub retry_backoff: BackoffPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_retries: u32,
}

impl ProviderPolicy {
    pub fn bybit_default() -> Self {
        Self {
            provider_id: ProviderId::Bybit,
            page_size: 200,
            page_delay: Duration::from_millis(200),
            max_concurrency: 4,
            quota_window: Duration::from_secs(1),
            quota_limit: 10,
            request_timeout: Duration::from_secs(30),
            retry_backoff: BackoffPolicy {
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
                max_retries: 3,
            },
        }
    }

    pub fn yahoo_default() -> Self {
        Self {
            provider_id: ProviderId::Yahoo,
            page_size: 500,
            page_delay: Duration::from_millis(200),
            max_concurrency: 2,
            quota_window: Duration::from_secs(60),
            quota_limit: 60,
            request_timeout: Duration::from_secs(30),
            retry_backoff: BackoffPolicy {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
                max_retries: 3,
            },
        }
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::Bybit => Self::bybit_default(),
            ProviderId::Yahoo => Self::yahoo_default(),
        }
    }

    /// How far back this provider serves history for an interval. Requests
    /// that start earlier get clamped, not rejected.
    pub fn max_lookback(&self, interval: Interval) -> Duration {
        let days = match self.provider_id {
            // Bybit serves deep kline history; bound minute data anyway so a
            // full-history gap stays within the auto-fill sanity ceiling.
            ProviderId::Bybit => match interval {
                Interval::OneMinute => 3,
                Interval::FiveMinutes => 14,
                Interval::FifteenMinutes => 45,
                Interval::OneHour => 180,
                Interval::FourHours => 720,
                Interval::OneDay => 2 * 365,
                Interval::OneWeek => 5 * 365,
            },
            // Yahoo chart API hard limits per granularity.
            ProviderId::Yahoo => match interval {
                Interval::OneMinute => 7,
                Interval::FiveMinutes | Interval::FifteenMinutes => 60,
                Interval::OneHour | Interval::FourHours => 730,
                Interval::OneDay | Interval::OneWeek => 100 * 365,
            },
        };
        Duration::from_secs(days * DAY_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bybit_policy_uses_kline_page_size() {
        let policy = ProviderPolicy::bybit_default();
        assert_eq!(policy.provider_id, ProviderId::Bybit);
        assert_eq!(policy.page_size, 200);
        assert_eq!(policy.quota_window, Duration::from_secs(1));
    }

    #[test]
    fn yahoo_minute_history_is_one_week() {
        let policy = ProviderPolicy::yahoo_default();
        assert_eq!(
            policy.max_lookback(Interval::OneMinute),
            Duration::from_secs(7 * DAY_SECS)
        );
        assert_eq!(
            policy.max_lookback(Interval::OneHour),
            Duration::from_secs(730 * DAY_SECS)
        );
    }
}
