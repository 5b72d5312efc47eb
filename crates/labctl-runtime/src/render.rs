//! Human-readable rendering of lifecycle events and status.

use labctl_core::error::ErrorKind;
use labctl_core::machine::LifecycleEvent;
use labctl_core::types::IdleLevel;

use crate::lifecycle::StatusReport;

/// `m:ss`, or `h:mm:ss` past an hour.
pub fn format_clock(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

pub fn render_event(event: &LifecycleEvent) -> String {
    match event {
        LifecycleEvent::Launching => "Starting your lab environment...".to_owned(),
        LifecycleEvent::Progress {
            percent,
            message,
            estimate,
        } => match estimate {
            Some(est) => format!("[{percent:>3}%] {message} ({est} remaining)"),
            None => format!("[{percent:>3}%] {message}"),
        },
        LifecycleEvent::Ready { url } => format!("Lab ready: {url}"),
        LifecycleEvent::IdleWarning {
            level: IdleLevel::Warning,
            seconds_left,
        } => format!(
            "You have been idle. The session ends in {} unless you type `active`.",
            format_clock(*seconds_left)
        ),
        LifecycleEvent::IdleWarning {
            level: IdleLevel::Critical,
            seconds_left,
        } => format!(
            "Session ending in {} due to inactivity! Type `active` to keep it.",
            format_clock(*seconds_left)
        ),
        LifecycleEvent::IdleCleared => "Idle warning dismissed.".to_owned(),
        LifecycleEvent::FocusModeEnabled => {
            "Focus mode on: the session will not end for inactivity.".to_owned()
        }
        LifecycleEvent::Countdown { seconds_left } => {
            format!("Time remaining: {}", format_clock(*seconds_left))
        }
        LifecycleEvent::QuotaLow { minutes_remaining } => format!(
            "Only {minutes_remaining} minutes of lab time left this month."
        ),
        LifecycleEvent::SplitViewRestored { url } => format!("Split view restored: {url}"),
        LifecycleEvent::Error {
            kind: ErrorKind::QuotaExceeded,
            message,
        } => format!("Usage limit reached: {message}"),
        LifecycleEvent::Error { kind, message } => format!("Error ({}): {message}", kind.as_str()),
        LifecycleEvent::Terminated { reason } => format!("Session ended ({reason})."),
    }
}

pub fn render_status(report: &StatusReport) -> String {
    let session = &report.session;
    let mut out = format!("phase: {:?}", report.phase).to_lowercase();
    if let Some(id) = &session.session_id {
        out.push_str(&format!("\nsession: {id} ({})", session.status));
    }
    if let Some(url) = &session.connection_url {
        out.push_str(&format!("\nurl: {url}"));
    }
    if let Some(expires) = session.expires_at {
        out.push_str(&format!("\nexpires: {}", expires.to_rfc3339()));
    }
    if session.focus_mode {
        out.push_str("\nfocus mode: on");
    }
    if report.split_view {
        out.push_str("\nsplit view: open");
    }
    if let Some((level, secs)) = report.idle_warning {
        out.push_str(&format!("\nidle {level}: {} left", format_clock(secs)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use labctl_core::machine::{Phase, TimerKind};
    use labctl_core::types::{Session, SessionStatus, TerminationReason, TimeEstimate};

    #[test]
    fn clock_format() {
        assert_eq!(format_clock(0), "0:00");
        assert_eq!(format_clock(75), "1:15");
        assert_eq!(format_clock(3600 + 61), "1:01:01");
    }

    #[test]
    fn progress_with_estimate() {
        let line = render_event(&LifecycleEvent::Progress {
            percent: 40,
            message: "Running health checks".into(),
            estimate: Some(TimeEstimate::secs(30, 90)),
        });
        assert_eq!(line, "[ 40%] Running health checks (~30-90 seconds remaining)");
    }

    #[test]
    fn critical_warning_mentions_time() {
        let line = render_event(&LifecycleEvent::IdleWarning {
            level: IdleLevel::Critical,
            seconds_left: 15,
        });
        assert!(line.contains("0:15"));
    }

    #[test]
    fn terminated_reason() {
        let line = render_event(&LifecycleEvent::Terminated {
            reason: TerminationReason::IdleTimeout,
        });
        assert_eq!(line, "Session ended (idle_timeout).");
    }

    #[test]
    fn status_lines() {
        let report = StatusReport {
            phase: Phase::Ready,
            session: Session {
                session_id: Some("s-1".into()),
                status: SessionStatus::Active,
                connection_url: Some("https://lab".into()),
                ..Session::default()
            },
            split_view: true,
            terminating: false,
            idle_warning: Some((IdleLevel::Warning, 300)),
            timers: vec![TimerKind::Heartbeat],
        };
        let text = render_status(&report);
        assert!(text.starts_with("phase: ready"));
        assert!(text.contains("session: s-1 (active)"));
        assert!(text.contains("split view: open"));
        assert!(text.contains("idle warning: 5:00 left"));
    }
}
