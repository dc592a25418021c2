use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::provider_policy::ProviderPolicy;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shared request gate for one provider: a requests-per-window quota plus a
/// bounded-concurrency semaphore. Safe to acquire from every interval loop at
/// once; callers hold the returned permit for the lifetime of the request.
#[derive(Clone)]
pub struct RequestGate {
    limiter: Arc<DirectRateLimiter>,
    concurrency: Arc<Semaphore>,
}

/// In-flight request slot. Dropping it frees the concurrency slot.
pub struct RequestPermit {
    _permit: OwnedSemaphorePermit,
}

impl RequestGate {
    pub fn new(quota_window: Duration, quota_limit: u32, max_concurrency: usize) -> Self {
        let quota = quota_from_window(quota_window, quota_limit);
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            concurrency: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn from_policy(policy: &ProviderPolicy) -> Self {
        Self::new(
            policy.quota_window,
            policy.quota_limit,
            policy.max_concurrency,
        )
    }

    /// Wait for both a concurrency slot and rate budget.
    pub async fn acquire(&self) -> RequestPermit {
        let permit = Arc::clone(&self.concurrency)
            .acquire_owned()
            .await
            .expect("request gate semaphore is never closed");
        self.limiter.until_ready().await;
        RequestPermit { _permit: permit }
    }

    /// Non-blocking probe used by tests and diagnostics.
    pub fn try_acquire(&self) -> Option<RequestPermit> {
        let permit = Arc::clone(&self.concurrency).try_acquire_owned().ok()?;
        self.limiter.check().ok()?;
        Some(RequestPermit { _permit: permit })
    }

    pub fn available_slots(&self) -> usize {
        self.concurrency.available_permits()
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let safe_limit = quota_limit.max(1);
    let burst = NonZeroU32::new(safe_limit).expect("safe limit must be non-zero");

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(safe_limit)).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .expect("period is always greater than zero")
        .allow_burst(burst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_slots_are_bounded() {
        let gate = RequestGate::new(Duration::from_secs(60), 100, 2);

        let first = gate.try_acquire().expect("first slot");
        let second = gate.try_acquire().expect("second slot");
        assert!(gate.try_acquire().is_none());

        drop(first);
        drop(second);
        assert_eq!(gate.available_slots(), 2);
    }

    #[test]
    fn quota_denies_burst_beyond_limit() {
        let gate = RequestGate::new(Duration::from_secs(60), 2, 8);

        assert!(gate.try_acquire().is_some());
        assert!(gate.try_acquire().is_some());
        // Third request within the window exceeds the quota even though
        // concurrency slots remain.
        assert!(gate.try_acquire().is_none());
    }
}
