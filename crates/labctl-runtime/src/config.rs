//! Launcher configuration: TOML file, then CLI/env overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use labctl_core::polling::{DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL_MS, PollPolicy};
use labctl_core::types::{DEFAULT_IDLE_TERMINATION_SECS, DEFAULT_IDLE_WARNING_SECS, IdleThresholds};

use crate::error::ConfigError;
use crate::quota::QuotaUsage;

pub const DEFAULT_TOKEN_HEADER: &str = "X-Lab-Token";
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_IDLE_CHECK_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_COUNTDOWN_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
/// Remaining minutes below which a launch is flagged as low-quota.
pub const DEFAULT_LOW_QUOTA_MINUTES: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// Endpoint returning `{success, token, api_url}`.
    pub token_url: Option<String>,
    /// Static token; skips the token endpoint when set.
    pub token: Option<String>,
    /// Orchestrator base URL; overrides the one from the token endpoint.
    pub api_url: Option<String>,
    pub token_header: String,
    pub student_id: String,
    pub student_name: Option<String>,
    /// Free-form launch metadata forwarded to the create call.
    pub metadata: BTreeMap<String, String>,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub heartbeat_interval_secs: u64,
    pub idle_check_interval_secs: u64,
    pub countdown_interval_ms: u64,
    pub idle_warning_secs: u64,
    pub idle_termination_secs: u64,
    pub http_timeout_secs: u64,
    /// Wait for the server to confirm expiry instead of tearing down locally.
    pub strict_expiry: bool,
    pub state_file: Option<PathBuf>,
    pub low_quota_minutes: u64,
    /// Usage endpoint queried before each launch; takes precedence over `quota`.
    pub usage_url: Option<String>,
    /// Cached usage; when present, launches are gated on it.
    pub quota: Option<QuotaUsage>,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            token_url: None,
            token: None,
            api_url: None,
            token_header: DEFAULT_TOKEN_HEADER.to_owned(),
            student_id: String::new(),
            student_name: None,
            metadata: BTreeMap::new(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            idle_check_interval_secs: DEFAULT_IDLE_CHECK_INTERVAL_SECS,
            countdown_interval_ms: DEFAULT_COUNTDOWN_INTERVAL_MS,
            idle_warning_secs: DEFAULT_IDLE_WARNING_SECS,
            idle_termination_secs: DEFAULT_IDLE_TERMINATION_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            strict_expiry: false,
            state_file: None,
            low_quota_minutes: DEFAULT_LOW_QUOTA_MINUTES,
            usage_url: None,
            quota: None,
        }
    }
}

impl LabConfig {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Load `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Checks needed before any orchestrator call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.is_none() && self.token_url.is_none() {
            return Err(ConfigError::Invalid(
                "either token or token_url must be set".to_owned(),
            ));
        }
        if self.token.is_some() && self.api_url.is_none() {
            return Err(ConfigError::Invalid(
                "api_url is required with a static token".to_owned(),
            ));
        }
        if self.token_header.trim().is_empty() {
            return Err(ConfigError::Invalid("token_header is empty".to_owned()));
        }
        if self.poll_interval_ms == 0
            || self.heartbeat_interval_secs == 0
            || self.idle_check_interval_secs == 0
            || self.countdown_interval_ms == 0
        {
            return Err(ConfigError::Invalid("intervals must be non-zero".to_owned()));
        }
        if self.idle_warning_secs >= self.idle_termination_secs {
            return Err(ConfigError::Invalid(
                "idle_warning_secs must be below idle_termination_secs".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval_ms: self.poll_interval_ms,
            max_attempts: self.max_poll_attempts,
        }
    }

    pub fn idle_thresholds(&self) -> IdleThresholds {
        IdleThresholds {
            warning_seconds: self.idle_warning_secs,
            termination_seconds: self.idle_termination_secs,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs)
    }

    pub fn countdown_interval(&self) -> Duration {
        Duration::from_millis(self.countdown_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Configured state file, else a per-user runtime location.
    pub fn state_file_path(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(default_state_file)
    }
}

/// Default state file using `$XDG_RUNTIME_DIR`, else `/tmp/labctl-$USER`.
pub fn default_state_file() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(format!("{dir}/labctl/view.json"));
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/labctl-{user}/view.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_defaults() {
        let cfg = LabConfig::from_toml("").expect("parse");
        assert_eq!(cfg, LabConfig::default());
        assert_eq!(cfg.poll_policy(), PollPolicy::default());
        assert_eq!(cfg.idle_thresholds(), IdleThresholds::default());
        assert_eq!(cfg.token_header, "X-Lab-Token");
    }

    #[test]
    fn partial_file_overrides() {
        let cfg = LabConfig::from_toml(
            r#"
            token_url = "https://lms.example/token"
            student_id = "42"
            poll_interval_ms = 1500
            strict_expiry = true

            [metadata]
            course = "net-101"

            [quota]
            plan = "basic"
            consumed_minutes = 120
            quota_minutes = 600
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.student_id, "42");
        assert_eq!(cfg.poll_interval_ms, 1500);
        assert_eq!(cfg.max_poll_attempts, 200);
        assert!(cfg.strict_expiry);
        assert_eq!(cfg.metadata.get("course").map(String::as_str), Some("net-101"));
        assert_eq!(cfg.quota.as_ref().map(|q| q.quota_minutes), Some(600));
        cfg.validate().expect("valid");
    }

    #[test]
    fn validate_rejects_missing_credentials() {
        let cfg = LabConfig::default();
        assert!(cfg.validate().is_err());
        let cfg = LabConfig {
            token: Some("t".into()),
            ..LabConfig::default()
        };
        assert!(cfg.validate().is_err(), "static token needs api_url");
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let cfg = LabConfig {
            token_url: Some("https://x".into()),
            idle_warning_secs: 1800,
            idle_termination_secs: 900,
            ..LabConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reports_path_on_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("labctl.toml");
        std::fs::write(&path, "poll_interval_ms = \"fast\"").expect("write");
        let err = LabConfig::load(Some(&path)).expect_err("bad type");
        assert!(err.to_string().contains("labctl.toml"));
        assert!(LabConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
        assert_eq!(LabConfig::load(None).expect("defaults"), LabConfig::default());
    }
}
