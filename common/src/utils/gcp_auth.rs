use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::BackendError;

use super::config::AppConfig;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Bearer tokens for Google APIs.
///
/// A statically configured token wins; otherwise tokens come from the runtime's
/// metadata server and are cached until shortly before expiry.
#[derive(Clone)]
pub enum AccessTokenProvider {
    Static(String),
    Metadata {
        http: reqwest::Client,
        cache: Arc<Mutex<Option<CachedToken>>>,
    },
}

impl std::fmt::Debug for AccessTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(_) => f.write_str("AccessTokenProvider::Static"),
            Self::Metadata { .. } => f.write_str("AccessTokenProvider::Metadata"),
        }
    }
}

impl AccessTokenProvider {
    pub fn from_config(config: &AppConfig, http: reqwest::Client) -> Self {
        match config
            .gcp_access_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
        {
            Some(token) => Self::Static(token.trim().to_string()),
            None => Self::Metadata {
                http,
                cache: Arc::new(Mutex::new(None)),
            },
        }
    }

    pub async fn token(&self) -> Result<String, BackendError> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::Metadata { http, cache } => {
                let mut guard = cache.lock().await;
                if let Some(cached) = guard.as_ref() {
                    if cached.expires_at > Instant::now() + REFRESH_MARGIN {
                        return Ok(cached.value.clone());
                    }
                }

                let fresh = fetch_metadata_token(http).await?;
                debug!("Refreshed access token from metadata server");
                let value = fresh.value.clone();
                *guard = Some(fresh);
                Ok(value)
            }
        }
    }
}

async fn fetch_metadata_token(http: &reqwest::Client) -> Result<CachedToken, BackendError> {
    let response = http
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| BackendError::Transient(format!("metadata server unreachable: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let message = format!("metadata server returned {status}");
        return Err(
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                BackendError::Transient(message)
            } else {
                BackendError::Permanent(message)
            },
        );
    }

    let token: MetadataToken = response
        .json()
        .await
        .map_err(|e| BackendError::Permanent(format!("invalid metadata token payload: {e}")))?;

    Ok(CachedToken {
        value: token.access_token,
        expires_at: Instant::now() + Duration::from_secs(token.expires_in),
    })
}
