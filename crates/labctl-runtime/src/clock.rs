//! Wall-clock view anchored to tokio's monotonic clock.
//!
//! `now()` advances with `tokio::time`, so timer-driven code and the
//! timestamps it hands to the state machine agree, including under a paused
//! test runtime.

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct LabClock {
    anchor_utc: DateTime<Utc>,
    anchor: Instant,
}

impl LabClock {
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// Clock reading `at` right now.
    pub fn anchored_at(at: DateTime<Utc>) -> Self {
        Self {
            anchor_utc: at,
            anchor: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.anchor.elapsed()).unwrap_or(TimeDelta::MAX);
        self.anchor_utc
            .checked_add_signed(elapsed)
            .unwrap_or(self.anchor_utc)
    }
}

impl Default for LabClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn follows_tokio_time() {
        let start = Utc::now();
        let clock = LabClock::anchored_at(start);
        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(clock.now() - start, TimeDelta::seconds(90));
    }
}
