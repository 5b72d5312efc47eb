//! Bounded poll budget and per-tick classification.
//!
//! Only elapsed attempts bound the loop: failed fetches consume an attempt
//! like any other tick and are never counted separately.

use serde::{Deserialize, Serialize};

use crate::progress;
use crate::types::PollAttempt;
use crate::wire::SessionSnapshot;

/// Default delay between status fetches (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;

/// Default attempt ceiling; with the default interval this is ~10 minutes.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// Perform fetch number `n` (1-based).
    Attempt(u32),
    /// The budget is spent; report a timeout and stop.
    Exhausted,
}

/// Monotonic attempt counter for one `start()` of the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollBudget {
    max_attempts: u32,
    attempts: u32,
}

impl PollBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_attempt(&mut self) -> PollStep {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.max_attempts {
            PollStep::Exhausted
        } else {
            PollStep::Attempt(self.attempts)
        }
    }
}

/// Result of decoding one status fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Still provisioning; show progress and keep going.
    Continue(PollAttempt),
    /// Status left provisioning (ready/active/error/terminated).
    Terminal(PollAttempt, SessionSnapshot),
}

/// Classify a decoded snapshot for attempt `attempt`.
///
/// Unknown statuses keep polling; the budget bounds them.
pub fn classify(snapshot: SessionSnapshot, attempt: u32) -> PollOutcome {
    let progress = progress::estimate(&snapshot, attempt);
    if snapshot.status.is_usable() || snapshot.status.is_failed() {
        PollOutcome::Terminal(progress, snapshot)
    } else {
        PollOutcome::Continue(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionStatus;

    #[test]
    fn budget_allows_exactly_max_attempts() {
        let mut b = PollBudget::new(DEFAULT_MAX_POLL_ATTEMPTS);
        for n in 1..=200 {
            assert_eq!(b.next_attempt(), PollStep::Attempt(n));
        }
        assert_eq!(b.next_attempt(), PollStep::Exhausted);
        assert_eq!(b.attempts(), 201);
    }

    #[test]
    fn zero_budget_is_immediately_exhausted() {
        let mut b = PollBudget::new(0);
        assert_eq!(b.next_attempt(), PollStep::Exhausted);
    }

    #[test]
    fn default_policy_is_ten_minutes() {
        let p = PollPolicy::default();
        assert_eq!(p.interval_ms * u64::from(p.max_attempts), 600_000);
    }

    #[test]
    fn classify_terminal_statuses() {
        for status in SessionStatus::ALL {
            let outcome = classify(SessionSnapshot::with_status(status), 1);
            let terminal = matches!(outcome, PollOutcome::Terminal(..));
            assert_eq!(
                terminal,
                status.is_usable() || status.is_failed(),
                "{status}"
            );
        }
    }

    #[test]
    fn classify_carries_progress() {
        let mut snap = SessionSnapshot::with_status(SessionStatus::Provisioning);
        snap.progress = Some(40.0);
        match classify(snap, 2) {
            PollOutcome::Continue(a) => {
                assert_eq!(a.progress_percent, 40);
                assert_eq!(a.attempt_number, 2);
            }
            other => panic!("expected continue, got {other:?}"),
        }
    }
}
