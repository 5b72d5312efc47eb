//! User-facing error taxonomy for the session lifecycle.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a [`LabError`], used to decide whether it reaches the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthFailure,
    QuotaExceeded,
    CreateFailed,
    PollTimeout,
    TransientPollError,
    TerminateFailed,
    HeartbeatFailure,
    SessionFailed,
    Malformed,
}

impl ErrorKind {
    /// Only these kinds are surfaced; the rest are recovered by the next loop iteration.
    pub fn is_user_visible(self) -> bool {
        matches!(
            self,
            Self::AuthFailure
                | Self::QuotaExceeded
                | Self::CreateFailed
                | Self::PollTimeout
                | Self::TerminateFailed
                | Self::SessionFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthFailure => "auth_failure",
            Self::QuotaExceeded => "quota_exceeded",
            Self::CreateFailed => "create_failed",
            Self::PollTimeout => "poll_timeout",
            Self::TransientPollError => "transient_poll_error",
            Self::TerminateFailed => "terminate_failed",
            Self::HeartbeatFailure => "heartbeat_failure",
            Self::SessionFailed => "session_failed",
            Self::Malformed => "malformed",
        }
    }
}

/// Usage details carried by a quota rejection, for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaInfo {
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub consumed_minutes: u64,
    #[serde(default)]
    pub quota_minutes: u64,
    #[serde(default)]
    pub resets_at: Option<String>,
}

impl QuotaInfo {
    /// Hours rounded to one decimal, as `(used, limit)`.
    pub fn hours(&self) -> (f64, f64) {
        let round = |m: u64| ((m as f64 / 60.0) * 10.0).round() / 10.0;
        (round(self.consumed_minutes), round(self.quota_minutes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabError {
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error(
        "monthly usage limit reached: {} of {} minutes used",
        .0.consumed_minutes,
        .0.quota_minutes
    )]
    QuotaExceeded(QuotaInfo),

    #[error("{0}")]
    CreateFailed(String),

    #[error("session creation timed out")]
    PollTimeout,

    #[error("status poll failed: {0}")]
    TransientPoll(String),

    #[error("failed to end session: {0}")]
    TerminateFailed(String),

    #[error("heartbeat failed: {0}")]
    HeartbeatFailure(String),

    #[error("{0}")]
    SessionFailed(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl LabError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthFailure(_) => ErrorKind::AuthFailure,
            Self::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            Self::CreateFailed(_) => ErrorKind::CreateFailed,
            Self::PollTimeout => ErrorKind::PollTimeout,
            Self::TransientPoll(_) => ErrorKind::TransientPollError,
            Self::TerminateFailed(_) => ErrorKind::TerminateFailed,
            Self::HeartbeatFailure(_) => ErrorKind::HeartbeatFailure,
            Self::SessionFailed(_) => ErrorKind::SessionFailed,
            Self::Malformed(_) => ErrorKind::Malformed,
        }
    }

    pub fn is_user_visible(&self) -> bool {
        self.kind().is_user_visible()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_policy() {
        assert!(ErrorKind::AuthFailure.is_user_visible());
        assert!(ErrorKind::QuotaExceeded.is_user_visible());
        assert!(ErrorKind::CreateFailed.is_user_visible());
        assert!(ErrorKind::PollTimeout.is_user_visible());
        assert!(ErrorKind::TerminateFailed.is_user_visible());
        assert!(!ErrorKind::TransientPollError.is_user_visible());
        assert!(!ErrorKind::HeartbeatFailure.is_user_visible());
    }

    #[test]
    fn poll_timeout_message_mentions_timeout() {
        assert!(LabError::PollTimeout.to_string().contains("timed out"));
    }

    #[test]
    fn quota_display_and_hours() {
        let info = QuotaInfo {
            plan: Some("Freemium".into()),
            consumed_minutes: 590,
            quota_minutes: 600,
            resets_at: None,
        };
        let err = LabError::QuotaExceeded(info.clone());
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert!(err.to_string().contains("590 of 600"));
        assert_eq!(info.hours(), (9.8, 10.0));
    }
}
