//! Idle detection ahead of server-side termination.
//!
//! Two inputs feed one decision:
//!
//! - **Local**: the timestamp of the last user-activity signal.
//! - **Remote**: warning/termination thresholds cached from every heartbeat.
//!
//! A raised warning is sticky. Activity signals only move the timestamp;
//! the warning is dismissed by [`IdleMonitor::keep_active`] or
//! [`IdleMonitor::enable_focus_mode`], or by a heartbeat in which the server
//! no longer reports idleness. Escalation to [`IdleLevel::Critical`] is only
//! ever driven by the server.

use chrono::{DateTime, Utc};

use crate::types::{ActivityKind, IdleLevel, IdleThresholds, SessionStatus};
use crate::wire::HeartbeatResponse;

/// Warning currently shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleWarning {
    pub level: IdleLevel,
    pub seconds_left: u64,
}

/// Change in the displayed warning produced by one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleSignal {
    /// Show (or update) the warning.
    Show(IdleWarning),
    /// Hide the warning.
    Cleared,
}

/// What a heartbeat response means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// Server terminated the session (idle timeout or otherwise).
    Terminated,
    /// Session alive; optional change to the displayed warning.
    Alive(Option<IdleSignal>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleMonitor {
    last_activity: DateTime<Utc>,
    thresholds: IdleThresholds,
    focus_mode: bool,
    tab_visible: bool,
    warning: Option<IdleWarning>,
}

impl IdleMonitor {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_thresholds(now, IdleThresholds::default())
    }

    pub fn with_thresholds(now: DateTime<Utc>, thresholds: IdleThresholds) -> Self {
        Self {
            last_activity: now,
            thresholds,
            focus_mode: false,
            tab_visible: true,
            warning: None,
        }
    }

    pub fn thresholds(&self) -> IdleThresholds {
        self.thresholds
    }

    pub fn focus_mode(&self) -> bool {
        self.focus_mode
    }

    pub fn tab_visible(&self) -> bool {
        self.tab_visible
    }

    pub fn warning(&self) -> Option<IdleWarning> {
        self.warning
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Whole seconds since the last activity signal.
    pub fn idle_seconds(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from(now.signed_duration_since(self.last_activity).num_seconds()).unwrap_or(0)
    }

    /// Record an activity signal. Never dismisses a shown warning.
    pub fn record_activity(&mut self, kind: ActivityKind, now: DateTime<Utc>) {
        match kind {
            ActivityKind::VisibilityLost => self.tab_visible = false,
            ActivityKind::VisibilityRegained => {
                self.tab_visible = true;
                self.last_activity = now;
            }
            _ => self.last_activity = now,
        }
    }

    /// Periodic local check between heartbeats.
    ///
    /// Raises at most one warning per idle episode: nothing happens while a
    /// warning is already shown or focus mode is on.
    pub fn check(&mut self, now: DateTime<Utc>) -> Option<IdleSignal> {
        if self.focus_mode || self.warning.is_some() {
            return None;
        }
        let idle = self.idle_seconds(now);
        if idle < self.thresholds.warning_seconds {
            return None;
        }
        let warning = IdleWarning {
            level: IdleLevel::Warning,
            seconds_left: self.thresholds.termination_seconds.saturating_sub(idle),
        };
        self.warning = Some(warning);
        Some(IdleSignal::Show(warning))
    }

    /// Fold a heartbeat response into the monitor.
    ///
    /// Thresholds and focus mode are adopted from the server before the
    /// warning flags are evaluated.
    pub fn apply_heartbeat(&mut self, resp: &HeartbeatResponse, now: DateTime<Utc>) -> HeartbeatVerdict {
        self.thresholds = resp.thresholds(self.thresholds);

        if resp.status == SessionStatus::Terminated {
            self.warning = None;
            return HeartbeatVerdict::Terminated;
        }

        if let Some(server_focus) = resp.focus_mode {
            self.focus_mode = server_focus;
        }

        if self.focus_mode {
            return HeartbeatVerdict::Alive(self.dismiss());
        }

        let level = if resp.idle_critical {
            IdleLevel::Critical
        } else if resp.idle_warning {
            IdleLevel::Warning
        } else {
            // A shown warning is sticky until keep-active or focus mode.
            return HeartbeatVerdict::Alive(None);
        };

        let seconds_left = resp
            .time_until_termination
            .map(|s| s.max(0.0).floor() as u64)
            .unwrap_or_else(|| {
                self.thresholds
                    .termination_seconds
                    .saturating_sub(self.idle_seconds(now))
            });

        let warning = IdleWarning {
            level,
            seconds_left,
        };
        if self.warning == Some(warning) {
            return HeartbeatVerdict::Alive(None);
        }
        self.warning = Some(warning);
        HeartbeatVerdict::Alive(Some(IdleSignal::Show(warning)))
    }

    /// "I'm active": reset the idle clock and dismiss the warning.
    pub fn keep_active(&mut self, now: DateTime<Utc>) -> Option<IdleSignal> {
        self.last_activity = now;
        self.dismiss()
    }

    /// Opt out of idle termination for the rest of the session.
    pub fn enable_focus_mode(&mut self) -> Option<IdleSignal> {
        self.focus_mode = true;
        self.dismiss()
    }

    /// Forget everything session-specific (keeps thresholds and visibility).
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
        self.focus_mode = false;
        self.warning = None;
    }

    fn dismiss(&mut self) -> Option<IdleSignal> {
        self.warning.take().map(|_| IdleSignal::Cleared)
    }
}
