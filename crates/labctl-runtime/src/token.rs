//! Short-lived API credentials.
//!
//! Every orchestrator call asks the provider for credentials, so a token
//! that rotates between calls is picked up without any caching logic here.

use async_trait::async_trait;
use reqwest::Client;

use labctl_core::wire::{TokenResponse, error_message, unwrap_envelope};

use crate::error::ApiError;

/// Token plus the orchestrator base URL it is valid for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub token: String,
    pub api_url: String,
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn credentials(&self) -> Result<ApiCredentials, ApiError>;
}

/// Fixed credentials (tests, or a pre-issued token).
pub struct StaticToken(pub ApiCredentials);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn credentials(&self) -> Result<ApiCredentials, ApiError> {
        Ok(self.0.clone())
    }
}

/// Fetches a fresh token from the host application's token endpoint.
pub struct HttpTokenProvider {
    client: Client,
    token_url: String,
    api_url_override: Option<String>,
}

impl HttpTokenProvider {
    pub fn new(client: Client, token_url: String, api_url_override: Option<String>) -> Self {
        Self {
            client,
            token_url,
            api_url_override,
        }
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn credentials(&self) -> Result<ApiCredentials, ApiError> {
        let resp = self
            .client
            .get(&self.token_url)
            .send()
            .await
            .map_err(|e| ApiError::Token(format!("token endpoint unreachable: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Token(format!("token response unreadable: {e}")))?;
        let body = match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(body) => body,
            Err(e) if status.is_success() => {
                return Err(ApiError::Token(format!("invalid token response: {e}")));
            }
            Err(_) => serde_json::Value::Null,
        };
        if !status.is_success() {
            let msg = error_message(&body).unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(ApiError::Token(msg));
        }
        let parsed: TokenResponse = serde_json::from_value(unwrap_envelope(body))
            .map_err(|e| ApiError::Token(format!("invalid token response: {e}")))?;
        credentials_from(parsed, self.api_url_override.as_deref())
    }
}

/// Validate a token response; `api_url_override` wins over the response's URL.
pub fn credentials_from(
    resp: TokenResponse,
    api_url_override: Option<&str>,
) -> Result<ApiCredentials, ApiError> {
    if !resp.success {
        return Err(ApiError::Token(
            resp.error.unwrap_or_else(|| "token endpoint refused".to_owned()),
        ));
    }
    let token = resp
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Token("no token in response".to_owned()))?;
    let api_url = api_url_override
        .map(str::to_owned)
        .or(resp.api_url)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::Token("no API URL configured".to_owned()))?;
    Ok(ApiCredentials {
        token,
        api_url: api_url.trim_end_matches('/').to_owned(),
    })
}
