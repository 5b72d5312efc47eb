use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LabError;

// ─── Session Status ───────────────────────────────────────────────

/// Remote session status as reported by the orchestrator.
///
/// `None` is the local "no session" value and is never sent by the server.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    None,
    Pending,
    Provisioning,
    Ready,
    Active,
    Error,
    Terminated,
}

impl SessionStatus {
    pub const ALL: [Self; 7] = [
        Self::None,
        Self::Pending,
        Self::Provisioning,
        Self::Ready,
        Self::Active,
        Self::Error,
        Self::Terminated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Error => "error",
            Self::Terminated => "terminated",
        }
    }

    /// Still being brought up; the poll loop owns sessions in these states.
    pub fn is_provisioning(self) -> bool {
        matches!(self, Self::Pending | Self::Provisioning)
    }

    /// Reachable; heartbeats own sessions in these states.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Ready | Self::Active)
    }

    pub fn is_failed(self) -> bool {
        matches!(self, Self::Error | Self::Terminated)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "pending" => Ok(Self::Pending),
            "provisioning" => Ok(Self::Provisioning),
            "ready" => Ok(Self::Ready),
            "active" => Ok(Self::Active),
            "error" => Ok(Self::Error),
            "terminated" => Ok(Self::Terminated),
            other => Err(LabError::malformed(format!("unknown session status: {other}"))),
        }
    }
}

// ─── Idle Policy ──────────────────────────────────────────────────

/// Warning threshold used until the first heartbeat supplies one (seconds).
pub const DEFAULT_IDLE_WARNING_SECS: u64 = 900;

/// Termination threshold used until the first heartbeat supplies one (seconds).
pub const DEFAULT_IDLE_TERMINATION_SECS: u64 = 1800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleThresholds {
    pub warning_seconds: u64,
    pub termination_seconds: u64,
}

impl Default for IdleThresholds {
    fn default() -> Self {
        Self {
            warning_seconds: DEFAULT_IDLE_WARNING_SECS,
            termination_seconds: DEFAULT_IDLE_TERMINATION_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleLevel {
    Warning,
    Critical,
}

impl fmt::Display for IdleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

/// A user-activity signal observed by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    PointerDown,
    KeyDown,
    Scroll,
    TouchStart,
    VisibilityRegained,
    /// Tab hidden. Tracked for `tab_visible`, not counted as activity.
    VisibilityLost,
}

impl ActivityKind {
    pub fn counts_as_activity(self) -> bool {
        !matches!(self, Self::VisibilityLost)
    }
}

// ─── Session ──────────────────────────────────────────────────────

/// The canonical local view of the remote session.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Option<String>,
    pub status: SessionStatus,
    pub connection_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub focus_mode: bool,
    pub idle_thresholds: IdleThresholds,
}

impl Session {
    /// Hollow placeholder created when a launch starts.
    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.session_id.is_none() && self.status == SessionStatus::None
    }

    /// Whether a response tagged with `session_id` still applies to this session.
    pub fn matches(&self, session_id: &str) -> bool {
        self.session_id.as_deref() == Some(session_id)
    }
}

/// Ephemeral result of one poll tick. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollAttempt {
    pub attempt_number: u32,
    pub progress_percent: u8,
    pub stage_message: String,
    pub time_estimate: Option<TimeEstimate>,
}

/// Coarse human time range. A smoothing device, not an ETA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeEstimate {
    pub min_secs: u32,
    pub max_secs: u32,
}

impl TimeEstimate {
    pub const fn secs(min_secs: u32, max_secs: u32) -> Self {
        Self { min_secs, max_secs }
    }

    pub const fn minutes(min: u32, max: u32) -> Self {
        Self {
            min_secs: min * 60,
            max_secs: max * 60,
        }
    }
}

impl fmt::Display for TimeEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.max_secs > 120 && self.min_secs % 60 == 0 && self.max_secs % 60 == 0 {
            write!(f, "~{}-{} minutes", self.min_secs / 60, self.max_secs / 60)
        } else {
            write!(f, "~{}-{} seconds", self.min_secs, self.max_secs)
        }
    }
}

// ─── Persisted View ───────────────────────────────────────────────

/// Subset of [`Session`] needed to reopen the split view after a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedViewState {
    pub session_id: String,
    pub connection_url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PersistedViewState {
    /// Build from a session that currently has a usable connection.
    pub fn from_session(session: &Session) -> Option<Self> {
        Some(Self {
            session_id: session.session_id.clone()?,
            connection_url: session.connection_url.clone()?,
            expires_at: session.expires_at,
        })
    }

    /// Entries without an expiry never go stale locally.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Why a session ended, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    UserRequested,
    IdleTimeout,
    Expired,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRequested => f.write_str("user_requested"),
            Self::IdleTimeout => f.write_str("idle_timeout"),
            Self::Expired => f.write_str("expired"),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn status_serde_roundtrip() {
        for s in SessionStatus::ALL {
            let json = serde_json::to_string(&s).expect("serialize");
            let back: SessionStatus = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(s, back);
        }
    }

    #[test]
    fn status_display_and_parse() {
        for s in SessionStatus::ALL {
            let parsed = s.to_string().parse::<SessionStatus>().expect("parse");
            assert_eq!(s, parsed);
        }
        assert!("booting".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn status_groups_are_disjoint() {
        for s in SessionStatus::ALL {
            let groups = [s.is_provisioning(), s.is_usable(), s.is_failed()];
            assert!(groups.iter().filter(|g| **g).count() <= 1, "{s}");
        }
    }

    #[test]
    fn default_thresholds() {
        let t = IdleThresholds::default();
        assert_eq!(t.warning_seconds, 900);
        assert_eq!(t.termination_seconds, 1800);
    }

    #[test]
    fn visibility_lost_is_not_activity() {
        assert!(!ActivityKind::VisibilityLost.counts_as_activity());
        assert!(ActivityKind::VisibilityRegained.counts_as_activity());
        assert!(ActivityKind::Scroll.counts_as_activity());
    }

    #[test]
    fn time_estimate_display() {
        assert_eq!(TimeEstimate::secs(30, 60).to_string(), "~30-60 seconds");
        assert_eq!(TimeEstimate::minutes(1, 3).to_string(), "~1-3 minutes");
        assert_eq!(TimeEstimate::secs(60, 120).to_string(), "~60-120 seconds");
    }

    #[test]
    fn view_state_requires_url_and_id() {
        let mut session = Session::placeholder();
        assert!(PersistedViewState::from_session(&session).is_none());
        session.session_id = Some("s-1".into());
        assert!(PersistedViewState::from_session(&session).is_none());
        session.connection_url = Some("https://lab".into());
        let view = PersistedViewState::from_session(&session).expect("view");
        assert_eq!(view.session_id, "s-1");
    }

    #[test]
    fn view_state_expiry() {
        let now = Utc::now();
        let mut view = PersistedViewState {
            session_id: "s-1".into(),
            connection_url: "https://lab".into(),
            expires_at: None,
        };
        assert!(!view.is_expired(now));
        view.expires_at = Some(now - TimeDelta::seconds(1));
        assert!(view.is_expired(now));
        view.expires_at = Some(now + TimeDelta::seconds(1));
        assert!(!view.is_expired(now));
    }
}
