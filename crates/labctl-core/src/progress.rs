//! Provisioning progress estimation.
//!
//! Pure mapping from a status snapshot (plus the poll attempt number) to a
//! percentage, a milestone message, and a coarse time estimate. Two layered
//! strategies, in priority order:
//!
//! 1. Server-supplied `progress` + `stage_message` are used verbatim.
//! 2. Otherwise the percentage comes from the server's bare `progress`, or
//!    from a per-status base table that creeps up by `2 × attempt` while
//!    provisioning. Guessed progress is capped at [`GUESSED_PROGRESS_CAP`];
//!    100 is reserved for a server-confirmed ready state.
//!
//! Messages come from a fixed milestone ladder so the UI shows discrete
//! steps instead of a jittering number.

use crate::types::{PollAttempt, SessionStatus, TimeEstimate};
use crate::wire::SessionSnapshot;

/// Highest percentage a guess may reach.
pub const GUESSED_PROGRESS_CAP: u8 = 94;

/// Progress gained per poll attempt while provisioning without server detail.
pub const PROGRESS_PER_ATTEMPT: u32 = 2;

/// Milestone ladder: `(threshold, message)`, ascending.
pub const MILESTONES: [(u8, &str); 12] = [
    (5, "Creating session"),
    (10, "Finding an available lab instance"),
    (18, "Instance assigned, preparing to start"),
    (25, "Instance is starting up"),
    (33, "Instance running, waiting for status checks"),
    (42, "Running health checks"),
    (50, "Health checks passed, loading lab tools"),
    (62, "Creating secure remote connection"),
    (70, "Remote connection ready"),
    (85, "Creating your access account"),
    (94, "Generating access credentials"),
    (100, "Lab environment ready"),
];

/// Base percentage for a status when the server sent none.
pub fn base_progress(status: SessionStatus) -> u8 {
    match status {
        SessionStatus::Pending => 10,
        SessionStatus::Provisioning => 25,
        SessionStatus::Ready | SessionStatus::Active => 100,
        _ => 10,
    }
}

/// Guess progress from status and attempt count alone.
pub fn guess_progress(status: SessionStatus, attempt: u32) -> u8 {
    let base = base_progress(status);
    if status != SessionStatus::Provisioning {
        return base;
    }
    let grown = u32::from(base).saturating_add(attempt.saturating_mul(PROGRESS_PER_ATTEMPT));
    grown.min(u32::from(GUESSED_PROGRESS_CAP)) as u8
}

/// Highest ladder threshold at or below `progress` (the first rung below 5).
pub fn milestone(progress: u8) -> (u8, &'static str) {
    MILESTONES
        .iter()
        .rev()
        .find(|(threshold, _)| progress >= *threshold)
        .copied()
        .unwrap_or(MILESTONES[0])
}

pub fn milestone_message(progress: u8) -> &'static str {
    milestone(progress).1
}

fn clamp_percent(raw: f64) -> Option<u8> {
    if !raw.is_finite() || raw <= 0.0 {
        return None;
    }
    Some(raw.round().min(100.0) as u8)
}

/// Map a snapshot to the progress shown for poll attempt `attempt`.
pub fn estimate(snapshot: &SessionSnapshot, attempt: u32) -> PollAttempt {
    let server_progress = snapshot.progress.and_then(clamp_percent);
    let server_message = snapshot
        .stage_message
        .as_deref()
        .filter(|m| !m.trim().is_empty());

    let (progress, message) = match (server_progress, server_message) {
        (Some(p), Some(m)) => (p, m.to_owned()),
        (Some(p), None) => (p, milestone_message(p).to_owned()),
        (None, _) => {
            let p = guess_progress(snapshot.status, attempt);
            (p, milestone_message(p).to_owned())
        }
    };

    PollAttempt {
        attempt_number: attempt,
        progress_percent: progress,
        stage_message: message,
        time_estimate: time_estimate(snapshot, progress),
    }
}

/// Coarse remaining-time range for a snapshot at `progress`.
///
/// Within one stage the range never grows as progress increases.
pub fn time_estimate(snapshot: &SessionSnapshot, progress: u8) -> Option<TimeEstimate> {
    match snapshot.status {
        SessionStatus::Ready | SessionStatus::Active => None,
        SessionStatus::Pending => Some(TimeEstimate::secs(5, 15)),
        SessionStatus::Provisioning => Some(provisioning_estimate(snapshot, progress)),
        _ => Some(TimeEstimate::minutes(1, 2)),
    }
}

fn provisioning_estimate(snapshot: &SessionSnapshot, progress: u8) -> TimeEstimate {
    let stage = snapshot.stage();
    let starting = stage == Some("instance_starting")
        || snapshot
            .stage_message
            .as_deref()
            .is_some_and(|m| m.contains("Starting"));

    if starting {
        return if progress < 40 {
            TimeEstimate::secs(30, 60)
        } else {
            TimeEstimate::secs(20, 40)
        };
    }

    if matches!(stage, Some("waiting_health" | "waiting_health_checks")) {
        let checks = snapshot.health_checks.clone().unwrap_or_default();
        return if checks.all_passed() {
            TimeEstimate::secs(5, 10)
        } else if checks.any_initializing() {
            TimeEstimate::secs(60, 120)
        } else {
            TimeEstimate::secs(30, 90)
        };
    }

    if stage == Some("allocating") || progress < 15 {
        TimeEstimate::minutes(1, 3)
    } else if progress >= 85 {
        TimeEstimate::secs(10, 20)
    } else {
        TimeEstimate::minutes(1, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::HealthChecks;

    fn snap(status: SessionStatus) -> SessionSnapshot {
        SessionSnapshot::with_status(status)
    }

    #[test]
    fn server_detail_used_verbatim() {
        let mut s = snap(SessionStatus::Provisioning);
        s.progress = Some(47.0);
        s.stage_message = Some("Configuring network interfaces... (2/3)".into());
        let a = estimate(&s, 3);
        assert_eq!(a.progress_percent, 47);
        assert_eq!(a.stage_message, "Configuring network interfaces... (2/3)");
        assert_eq!(a.attempt_number, 3);
    }

    #[test]
    fn bare_server_progress_uses_ladder_message() {
        let mut s = snap(SessionStatus::Provisioning);
        s.progress = Some(40.0);
        let a = estimate(&s, 1);
        assert_eq!(a.progress_percent, 40);
        assert_eq!(a.stage_message, milestone_message(33));
    }

    #[test]
    fn fallback_table() {
        assert_eq!(guess_progress(SessionStatus::Pending, 50), 10);
        assert_eq!(guess_progress(SessionStatus::Provisioning, 0), 25);
        assert_eq!(guess_progress(SessionStatus::Provisioning, 5), 35);
        assert_eq!(guess_progress(SessionStatus::Ready, 0), 100);
        assert_eq!(guess_progress(SessionStatus::Active, 9), 100);
        assert_eq!(guess_progress(SessionStatus::None, 9), 10);
    }

    #[test]
    fn guessed_provisioning_caps_at_94() {
        assert_eq!(guess_progress(SessionStatus::Provisioning, 34), 93);
        assert_eq!(guess_progress(SessionStatus::Provisioning, 35), 94);
        assert_eq!(guess_progress(SessionStatus::Provisioning, 200), 94);
        assert_eq!(guess_progress(SessionStatus::Provisioning, u32::MAX), 94);
    }

    #[test]
    fn ladder_picks_highest_threshold_at_or_below() {
        assert_eq!(milestone(0).0, 5);
        assert_eq!(milestone(4).0, 5);
        assert_eq!(milestone(5).0, 5);
        assert_eq!(milestone(17).0, 10);
        assert_eq!(milestone(18).0, 18);
        assert_eq!(milestone(93).0, 85);
        assert_eq!(milestone(94).0, 94);
        assert_eq!(milestone(100).0, 100);
    }

    #[test]
    fn ladder_is_ascending() {
        assert!(MILESTONES.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn server_progress_is_clamped() {
        let mut s = snap(SessionStatus::Provisioning);
        s.progress = Some(250.0);
        assert_eq!(estimate(&s, 1).progress_percent, 100);
        s.progress = Some(0.0);
        assert_eq!(estimate(&s, 1).progress_percent, 27);
    }

    #[test]
    fn no_estimate_once_ready() {
        assert!(time_estimate(&snap(SessionStatus::Ready), 100).is_none());
        assert!(time_estimate(&snap(SessionStatus::Active), 100).is_none());
        assert_eq!(
            time_estimate(&snap(SessionStatus::Pending), 10),
            Some(TimeEstimate::secs(5, 15))
        );
    }

    #[test]
    fn estimates_never_grow_within_a_stage() {
        let stages: [Option<&str>; 4] = [None, Some("instance_starting"), Some("waiting_health"), Some("allocating")];
        for stage in stages {
            let mut s = snap(SessionStatus::Provisioning);
            s.stage = stage.map(str::to_owned);
            let mut prev: Option<TimeEstimate> = None;
            for p in 0..=100u8 {
                let est = time_estimate(&s, p).expect("provisioning has an estimate");
                if let Some(prev) = prev {
                    assert!(est.max_secs <= prev.max_secs, "stage {stage:?} grew at {p}");
                }
                prev = Some(est);
            }
        }
    }

    #[test]
    fn health_check_estimates() {
        let mut s = snap(SessionStatus::Provisioning);
        s.provisioning_stage = Some("waiting_health_checks".into());
        s.health_checks = Some(HealthChecks {
            system_status: Some("initializing".into()),
            instance_status: Some("passed".into()),
        });
        assert_eq!(time_estimate(&s, 42), Some(TimeEstimate::secs(60, 120)));
        s.health_checks = Some(HealthChecks {
            system_status: Some("passed".into()),
            instance_status: Some("passed".into()),
        });
        assert_eq!(time_estimate(&s, 42), Some(TimeEstimate::secs(5, 10)));
        s.health_checks = None;
        assert_eq!(time_estimate(&s, 42), Some(TimeEstimate::secs(30, 90)));
    }

    #[test]
    fn deterministic() {
        let mut s = snap(SessionStatus::Provisioning);
        s.stage = Some("instance_starting".into());
        assert_eq!(estimate(&s, 7), estimate(&s, 7));
    }
}
