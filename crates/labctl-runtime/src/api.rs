//! Orchestrator HTTP client.
//!
//! [`SessionApi`] is the seam the lifecycle talks to; [`HttpSessionApi`] is
//! the reqwest implementation. Every method returns the user-facing
//! [`LabError`], already classified for the call that failed.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;

use labctl_core::error::LabError;
use labctl_core::wire::{
    ActiveSessions, CreateSessionRequest, HeartbeatRequest, HeartbeatResponse, SessionSnapshot,
    TerminateRequest, error_message, parse_quota_rejection, unwrap_envelope,
};

use crate::error::{ApiError, ApiOp};
use crate::token::TokenProvider;

#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn create_session(&self, req: &CreateSessionRequest) -> Result<SessionSnapshot, LabError>;

    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot, LabError>;

    /// The student's current session, if any (first of `active_sessions`).
    async fn active_session(&self, student_id: &str) -> Result<Option<SessionSnapshot>, LabError>;

    async fn heartbeat(
        &self,
        session_id: &str,
        req: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, LabError>;

    async fn terminate(&self, session_id: &str, req: &TerminateRequest) -> Result<(), LabError>;
}

pub struct HttpSessionApi {
    client: Client,
    tokens: Arc<dyn TokenProvider>,
    token_header: HeaderName,
}

impl HttpSessionApi {
    pub fn new(
        client: Client,
        tokens: Arc<dyn TokenProvider>,
        token_header: &str,
    ) -> Result<Self, ApiError> {
        let token_header = HeaderName::from_bytes(token_header.as_bytes())
            .map_err(|e| ApiError::Header(format!("{token_header}: {e}")))?;
        Ok(Self {
            client,
            tokens,
            token_header,
        })
    }

    /// One authenticated call; returns the unwrapped body of a 2xx response.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ApiError> {
        let creds = self.tokens.credentials().await?;
        let token = HeaderValue::from_str(&creds.token)
            .map_err(|e| ApiError::Header(format!("token: {e}")))?;
        let url = format!("{}/{}", creds.api_url, path.trim_start_matches('/'));

        let mut req = self
            .client
            .request(method.clone(), &url)
            .header(self.token_header.clone(), token);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        tracing::debug!("{method} {path} -> {status}");
        decode_body(status, &text)
    }
}

/// Classify a raw response: quota rejection, error status, or envelope body.
pub fn decode_body(status: u16, text: &str) -> Result<serde_json::Value, ApiError> {
    let success = (200..300).contains(&status);
    let value = if text.trim().is_empty() {
        serde_json::Value::Null
    } else if success {
        serde_json::from_str(text)?
    } else {
        serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_owned()))
    };

    if !success {
        if let Some(info) = parse_quota_rejection(status, &value) {
            return Err(ApiError::Quota(info));
        }
        let message = error_message(&value).unwrap_or_else(|| format!("HTTP {status}"));
        return Err(ApiError::Status { status, message });
    }
    Ok(unwrap_envelope(value))
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, ApiError> {
    Ok(serde_json::from_value(value)?)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, ApiError> {
    Ok(serde_json::to_value(value)?)
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn create_session(&self, req: &CreateSessionRequest) -> Result<SessionSnapshot, LabError> {
        let op = ApiOp::Create;
        let body = to_json(req).map_err(|e| e.classify(op))?;
        let value = self
            .call(Method::POST, "sessions", Some(body))
            .await
            .map_err(|e| e.classify(op))?;
        let snap: SessionSnapshot = decode(value).map_err(|e| e.classify(op))?;
        if snap.session_id.is_none() {
            return Err(LabError::CreateFailed(
                "invalid response from API: missing session_id".to_owned(),
            ));
        }
        Ok(snap)
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot, LabError> {
        let op = ApiOp::Status;
        let value = self
            .call(Method::GET, &format!("sessions/{session_id}"), None)
            .await
            .map_err(|e| e.classify(op))?;
        let mut snap: SessionSnapshot = decode(value).map_err(|e| e.classify(op))?;
        snap.session_id.get_or_insert_with(|| session_id.to_owned());
        Ok(snap)
    }

    async fn active_session(&self, student_id: &str) -> Result<Option<SessionSnapshot>, LabError> {
        let op = ApiOp::ListActive;
        let value = self
            .call(Method::GET, &format!("students/{student_id}/sessions"), None)
            .await
            .map_err(|e| e.classify(op))?;
        let list: ActiveSessions = decode(value).map_err(|e| e.classify(op))?;
        Ok(list
            .active_sessions
            .into_iter()
            .find(|s| s.session_id.is_some()))
    }

    async fn heartbeat(
        &self,
        session_id: &str,
        req: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, LabError> {
        let op = ApiOp::Heartbeat;
        let body = to_json(req).map_err(|e| e.classify(op))?;
        let value = self
            .call(
                Method::POST,
                &format!("sessions/{session_id}/heartbeat"),
                Some(body),
            )
            .await
            .map_err(|e| e.classify(op))?;
        decode(value).map_err(|e| e.classify(op))
    }

    async fn terminate(&self, session_id: &str, req: &TerminateRequest) -> Result<(), LabError> {
        let op = ApiOp::Terminate;
        let body = to_json(req).map_err(|e| e.classify(op))?;
        self.call(Method::DELETE, &format!("sessions/{session_id}"), Some(body))
            .await
            .map(|_| ())
            .map_err(|e| e.classify(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_body_is_unwrapped() {
        let v = decode_body(201, r#"{"success":true,"data":{"session_id":"s-1","status":"pending"}}"#)
            .expect("ok");
        assert_eq!(v, json!({"session_id": "s-1", "status": "pending"}));
    }

    #[test]
    fn empty_success_body_is_null() {
        assert_eq!(decode_body(204, "").expect("ok"), serde_json::Value::Null);
    }

    #[test]
    fn invalid_json_on_success_is_decode_error() {
        assert!(matches!(decode_body(200, "<html>"), Err(ApiError::Decode(_))));
    }

    #[test]
    fn quota_rejection_is_distinguished() {
        let body = r#"{"message":"Forbidden","details":{"error":"quota_exceeded","consumed_minutes":590,"quota_minutes":600}}"#;
        match decode_body(403, body) {
            Err(ApiError::Quota(info)) => assert_eq!(info.quota_minutes, 600),
            other => panic!("expected quota, got {other:?}"),
        }
    }

    #[test]
    fn plain_forbidden_is_status_error() {
        match decode_body(403, r#"{"error":"forbidden"}"#) {
            Err(ApiError::Status { status, message }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "forbidden");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[test]
    fn non_json_error_body_falls_back_to_status_line() {
        match decode_body(502, "<html>bad gateway</html>") {
            Err(ApiError::Status { message, .. }) => assert_eq!(message, "HTTP 502"),
            other => panic!("expected status error, got {other:?}"),
        }
    }
}
