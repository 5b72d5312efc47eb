//! Runtime-side error types.
//!
//! [`ApiError`] describes what went wrong on the wire; [`ApiError::classify`]
//! turns it into the user-facing [`LabError`] for the operation that failed.

use labctl_core::error::{LabError, QuotaInfo};
use thiserror::Error;

/// Orchestrator call an [`ApiError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOp {
    Create,
    Status,
    ListActive,
    Heartbeat,
    Terminate,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("token request failed: {0}")]
    Token(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("quota exceeded")]
    Quota(QuotaInfo),

    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid header: {0}")]
    Header(String),
}

impl ApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Token(_) | Self::Status { status: 401, .. })
    }

    /// Map to the lifecycle taxonomy for `op`.
    pub fn classify(self, op: ApiOp) -> LabError {
        if self.is_auth() {
            return LabError::AuthFailure(self.to_string());
        }
        let message = match self {
            Self::Quota(info) => return LabError::QuotaExceeded(info),
            Self::Status { message, .. } => message,
            other => other.to_string(),
        };
        match op {
            ApiOp::Create => LabError::CreateFailed(format!("failed to create session: {message}")),
            ApiOp::Status | ApiOp::ListActive => LabError::TransientPoll(message),
            ApiOp::Heartbeat => LabError::HeartbeatFailure(message),
            ApiOp::Terminate => LabError::TerminateFailed(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
