//! Wire concrete collaborators from a [`LabConfig`].

use std::sync::Arc;

use reqwest::Client;

use crate::api::{HttpSessionApi, SessionApi};
use crate::clock::LabClock;
use crate::config::LabConfig;
use crate::error::ApiError;
use crate::lifecycle::LifecycleDeps;
use crate::quota::{AlwaysAllow, CachedUsageGate, HttpUsageGate, QuotaGate};
use crate::store::{FileStore, ViewStore};
use crate::token::{ApiCredentials, HttpTokenProvider, StaticToken, TokenProvider};

pub fn build_http_client(config: &LabConfig) -> Result<Client, ApiError> {
    Ok(Client::builder().timeout(config.http_timeout()).build()?)
}

pub fn build_token_provider(config: &LabConfig, client: Client) -> Arc<dyn TokenProvider> {
    match (&config.token, &config.token_url) {
        (Some(token), _) => Arc::new(StaticToken(ApiCredentials {
            token: token.clone(),
            api_url: config
                .api_url
                .clone()
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_owned(),
        })),
        (None, token_url) => Arc::new(HttpTokenProvider::new(
            client,
            token_url.clone().unwrap_or_default(),
            config.api_url.clone(),
        )),
    }
}

pub fn build_api(config: &LabConfig) -> Result<Arc<dyn SessionApi>, ApiError> {
    let client = build_http_client(config)?;
    let tokens = build_token_provider(config, client.clone());
    Ok(Arc::new(HttpSessionApi::new(
        client,
        tokens,
        &config.token_header,
    )?))
}

/// A live usage URL wins over a configured snapshot.
pub fn build_quota(config: &LabConfig) -> Result<Arc<dyn QuotaGate>, ApiError> {
    if let Some(url) = &config.usage_url {
        return Ok(Arc::new(HttpUsageGate::new(
            build_http_client(config)?,
            url.clone(),
            config.low_quota_minutes,
        )));
    }
    Ok(match &config.quota {
        Some(usage) => Arc::new(CachedUsageGate::new(usage.clone(), config.low_quota_minutes)),
        None => Arc::new(AlwaysAllow),
    })
}

pub fn build_store(config: &LabConfig) -> Arc<ViewStore> {
    Arc::new(ViewStore::new(FileStore::new(config.state_file_path())))
}

pub fn build_deps(config: &LabConfig) -> Result<LifecycleDeps, ApiError> {
    Ok(LifecycleDeps {
        api: build_api(config)?,
        quota: build_quota(config)?,
        store: build_store(config),
        clock: LabClock::new(),
    })
}
