use std::time::Duration;

use serde::{Deserialize, Serialize};

use barkeep_core::Interval;

use crate::SyncError;

/// How often one interval is re-polled and how many bars each poll requests.
///
/// `bars_per_poll` must be at least 2: the newest bar a provider returns is
/// usually still open, so the next tick has to re-fetch and overwrite it once
/// it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSchedule {
    pub interval: Interval,
    pub poll_period_secs: u64,
    pub bars_per_poll: usize,
}

impl SyncSchedule {
    pub const fn new(interval: Interval, poll_period_secs: u64, bars_per_poll: usize) -> Self {
        Self {
            interval,
            poll_period_secs,
            bars_per_poll,
        }
    }

    pub const fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_period_secs)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.poll_period_secs == 0 {
            return Err(SyncError::InvalidConfig(format!(
                "schedule for {} has a zero poll period",
                self.interval
            )));
        }
        if self.bars_per_poll < 2 {
            return Err(SyncError::InvalidConfig(format!(
                "schedule for {} polls {} bars; at least 2 are required to refresh the open bar",
                self.interval, self.bars_per_poll
            )));
        }
        Ok(())
    }

    /// Poll each interval once per bucket: minute bars every minute, daily
    /// bars once a day.
    pub fn default_crypto() -> Vec<Self> {
        vec![
            Self::new(Interval::OneMinute, 60, 2),
            Self::new(Interval::FiveMinutes, 300, 2),
            Self::new(Interval::FifteenMinutes, 900, 2),
            Self::new(Interval::OneHour, 3_600, 2),
            Self::new(Interval::FourHours, 14_400, 2),
            Self::new(Interval::OneDay, 86_400, 2),
        ]
    }

    /// Futures schedule. The chart provider has no 4h granularity, so that
    /// interval is absent here.
    pub fn default_futures() -> Vec<Self> {
        vec![
            Self::new(Interval::OneMinute, 60, 3),
            Self::new(Interval::FiveMinutes, 300, 2),
            Self::new(Interval::FifteenMinutes, 900, 2),
            Self::new(Interval::OneHour, 3_600, 2),
            Self::new(Interval::OneDay, 86_400, 2),
        ]
    }
}
