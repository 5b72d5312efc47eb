//! Orchestrator wire schemas.
//!
//! The orchestrator wraps most bodies in `{success, message, data, timestamp}`
//! (older deployments use `body`), so every decoder goes through
//! [`unwrap_envelope`] first. Field names follow the orchestrator's
//! snake_case JSON.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::QuotaInfo;
use crate::types::{IdleThresholds, SessionStatus};

// ─── Envelope ─────────────────────────────────────────────────────

/// Strip the `{success, data}` / `{body}` wrapper if present.
pub fn unwrap_envelope(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut map) => {
            for key in ["data", "body"] {
                if map.get(key).is_some_and(serde_json::Value::is_object) {
                    if let Some(inner) = map.remove(key) {
                        return inner;
                    }
                }
            }
            serde_json::Value::Object(map)
        }
        other => other,
    }
}

/// Best human-readable message in an error body (`error`, then `message`).
pub fn error_message(body: &serde_json::Value) -> Option<String> {
    ["error", "message"]
        .iter()
        .filter_map(|k| body.get(*k).and_then(serde_json::Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Recognise the distinguished `403 quota_exceeded` rejection.
///
/// The quota payload may sit under `details`, `data`, or at the root.
pub fn parse_quota_rejection(http_status: u16, body: &serde_json::Value) -> Option<QuotaInfo> {
    if http_status != 403 {
        return None;
    }
    let payload = ["details", "data"]
        .iter()
        .filter_map(|k| body.get(*k))
        .find(|v| v.is_object())
        .unwrap_or(body);
    if payload.get("error").and_then(serde_json::Value::as_str) != Some("quota_exceeded") {
        return None;
    }
    serde_json::from_value(payload.clone()).ok()
}

// ─── Lenient field decoding ───────────────────────────────────────

fn lenient_status<'de, D>(deserializer: D) -> Result<SessionStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(match raw.as_deref() {
        Some("terminating") => SessionStatus::Terminated,
        Some(s) => s.parse().unwrap_or_default(),
        None => SessionStatus::None,
    })
}

fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

/// Parse RFC 3339, falling back to a naive ISO timestamp taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ─── Session snapshots ────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default)]
    pub direct_url: Option<String>,
    #[serde(default)]
    pub guacamole_connection_url: Option<String>,
    #[serde(default)]
    pub guacamole_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HealthChecks {
    #[serde(default)]
    pub system_status: Option<String>,
    #[serde(default)]
    pub instance_status: Option<String>,
}

impl HealthChecks {
    pub fn all_passed(&self) -> bool {
        self.system_status.as_deref() == Some("passed")
            && self.instance_status.as_deref() == Some("passed")
    }

    pub fn any_initializing(&self) -> bool {
        self.system_status.as_deref() == Some("initializing")
            || self.instance_status.as_deref() == Some("initializing")
    }
}

/// One session as returned by create, status, or list calls.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: SessionStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub provisioning_stage: Option<String>,
    #[serde(default)]
    pub stage_message: Option<String>,
    #[serde(default)]
    pub health_checks: Option<HealthChecks>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub connection_info: Option<ConnectionInfo>,
    #[serde(default)]
    pub direct_url: Option<String>,
    #[serde(default)]
    pub guacamole_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub connection_url: Option<String>,
    #[serde(default)]
    pub reused: bool,
}

impl SessionSnapshot {
    pub fn with_status(status: SessionStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Sub-stage name, whichever field the orchestrator used.
    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref().or(self.provisioning_stage.as_deref())
    }

    /// Resolve the interactive endpoint.
    ///
    /// Priority order:
    /// 1. `connection_info.direct_url`
    /// 2. `connection_info.guacamole_connection_url`
    /// 3. `connection_info.guacamole_url`
    /// 4. `direct_url`
    /// 5. `guacamole_url`
    /// 6. `url`
    /// 7. `connection_url`
    ///
    /// Empty strings are skipped.
    pub fn connection_url(&self) -> Option<String> {
        let info = self.connection_info.as_ref();
        [
            info.and_then(|i| i.direct_url.as_deref()),
            info.and_then(|i| i.guacamole_connection_url.as_deref()),
            info.and_then(|i| i.guacamole_url.as_deref()),
            self.direct_url.as_deref(),
            self.guacamole_url.as_deref(),
            self.url.as_deref(),
            self.connection_url.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|u| !u.trim().is_empty())
        .map(str::to_owned)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ActiveSessions {
    #[serde(default)]
    pub active_sessions: Vec<SessionSnapshot>,
}

// ─── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateSessionRequest {
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartbeatRequest {
    pub activity_type: String,
    pub tab_visible: bool,
    pub focus_mode: bool,
}

impl HeartbeatRequest {
    pub fn new(tab_visible: bool, focus_mode: bool) -> Self {
        Self {
            activity_type: "browser".to_owned(),
            tab_visible,
            focus_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminateRequest {
    pub reason: String,
    /// `false` returns the instance to the warm pool.
    pub stop_instance: bool,
}

impl TerminateRequest {
    pub fn user_requested() -> Self {
        Self {
            reason: "user_requested".to_owned(),
            stop_instance: false,
        }
    }
}

// ─── Heartbeat & token responses ──────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: SessionStatus,
    #[serde(default)]
    pub idle_warning: bool,
    #[serde(default)]
    pub idle_critical: bool,
    #[serde(default)]
    pub idle_warning_threshold: Option<f64>,
    #[serde(default)]
    pub idle_termination_threshold: Option<f64>,
    #[serde(default)]
    pub focus_mode: Option<bool>,
    #[serde(default)]
    pub time_until_termination: Option<f64>,
    #[serde(default)]
    pub idle_seconds: Option<f64>,
}

impl HeartbeatResponse {
    /// Thresholds from this response, falling back per-field to `current`.
    pub fn thresholds(&self, current: IdleThresholds) -> IdleThresholds {
        let secs = |v: Option<f64>| v.filter(|s| *s > 0.0).map(|s| s.round() as u64);
        IdleThresholds {
            warning_seconds: secs(self.idle_warning_threshold).unwrap_or(current.warning_seconds),
            termination_seconds: secs(self.idle_termination_threshold)
                .unwrap_or(current.termination_seconds),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_data_is_unwrapped() {
        let v = unwrap_envelope(json!({"success": true, "data": {"session_id": "s-1"}}));
        assert_eq!(v, json!({"session_id": "s-1"}));
    }

    #[test]
    fn envelope_body_is_unwrapped() {
        let v = unwrap_envelope(json!({"body": {"status": "ready"}}));
        assert_eq!(v, json!({"status": "ready"}));
    }

    #[test]
    fn bare_object_passes_through() {
        let v = unwrap_envelope(json!({"status": "ready", "data": "not-an-object"}));
        assert_eq!(v["status"], "ready");
    }

    #[test]
    fn connection_url_priority() {
        let snap: SessionSnapshot = serde_json::from_value(json!({
            "status": "ready",
            "url": "https://fallback",
            "connection_info": {"guacamole_url": "https://guac", "direct_url": "https://direct"}
        }))
        .expect("decode");
        assert_eq!(snap.connection_url().as_deref(), Some("https://direct"));

        let snap: SessionSnapshot = serde_json::from_value(json!({
            "status": "ready",
            "url": "https://fallback",
            "connection_info": {"direct_url": ""}
        }))
        .expect("decode");
        assert_eq!(snap.connection_url().as_deref(), Some("https://fallback"));

        assert_eq!(SessionSnapshot::default().connection_url(), None);
    }

    #[test]
    fn unknown_and_terminating_status() {
        let snap: SessionSnapshot =
            serde_json::from_value(json!({"status": "allocating"})).expect("decode");
        assert_eq!(snap.status, SessionStatus::None);
        let snap: SessionSnapshot =
            serde_json::from_value(json!({"status": "terminating"})).expect("decode");
        assert_eq!(snap.status, SessionStatus::Terminated);
    }

    #[test]
    fn naive_and_rfc3339_timestamps() {
        let a = parse_timestamp("2026-01-01T10:00:00Z").expect("rfc3339");
        let b = parse_timestamp("2026-01-01T10:00:00.000").expect("naive");
        assert_eq!(a, b);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn quota_rejection_nested_under_details() {
        let body = json!({
            "message": "Forbidden",
            "details": {
                "error": "quota_exceeded",
                "consumed_minutes": 590,
                "quota_minutes": 600,
                "resets_at": "2026-02-01T00:00:00Z"
            }
        });
        let info = parse_quota_rejection(403, &body).expect("quota");
        assert_eq!(info.consumed_minutes, 590);
        assert_eq!(info.quota_minutes, 600);
        assert!(parse_quota_rejection(500, &body).is_none());
    }

    #[test]
    fn quota_rejection_at_root() {
        let body = json!({"error": "quota_exceeded", "consumed_minutes": 10, "quota_minutes": 10});
        assert!(parse_quota_rejection(403, &body).is_some());
        let other = json!({"error": "forbidden"});
        assert!(parse_quota_rejection(403, &other).is_none());
    }

    #[test]
    fn error_message_prefers_error_field() {
        assert_eq!(
            error_message(&json!({"error": "boom", "message": "other"})).as_deref(),
            Some("boom")
        );
        assert_eq!(
            error_message(&json!({"error": "", "message": "other"})).as_deref(),
            Some("other")
        );
        assert_eq!(error_message(&json!({})), None);
    }

    #[test]
    fn heartbeat_thresholds_fall_back_per_field() {
        let resp: HeartbeatResponse = serde_json::from_value(json!({
            "status": "active",
            "idle_warning_threshold": 600
        }))
        .expect("decode");
        let t = resp.thresholds(IdleThresholds::default());
        assert_eq!(t.warning_seconds, 600);
        assert_eq!(t.termination_seconds, 1800);
    }

    #[test]
    fn heartbeat_request_shape() {
        let v = serde_json::to_value(HeartbeatRequest::new(true, false)).expect("encode");
        assert_eq!(
            v,
            json!({"activity_type": "browser", "tab_visible": true, "focus_mode": false})
        );
    }
}
