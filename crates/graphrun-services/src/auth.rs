use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use graphrun_core::error::{GraphError, Result};
use graphrun_core::traits::TokenProvider;

const AUTH_PATH: &str = "/sdk-auth/authenticate";
const API_KEY_HEADER: &str = "X-Timely-API";

#[derive(Deserialize)]
struct AuthResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<AuthData>,
}

#[derive(Deserialize)]
struct AuthData {
    #[serde(default)]
    access_token: Option<String>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Exchanges an API key for an access token and caches it for a fixed TTL.
///
/// Concurrent callers share one in-flight authentication.
pub struct ApiKeyTokenProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    ttl: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl ApiKeyTokenProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, ttl: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key, ttl)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Drop the cached token so the next call authenticates again.
    pub async fn clear(&self) {
        *self.cached.lock().await = None;
    }

    async fn authenticate(&self) -> Result<String> {
        let url = format!("{}{}", self.base_url, AUTH_PATH);
        debug!(url = %url, "Authenticating with API key");

        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| GraphError::Auth(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(GraphError::Auth(format!("HTTP {}: {}", status, body)));
        }

        let body: AuthResponse = response
            .json()
            .await
            .map_err(|e| GraphError::Auth(e.to_string()))?;
        token_from(body)
    }
}

fn token_from(body: AuthResponse) -> Result<String> {
    match body.data.and_then(|d| d.access_token) {
        Some(token) if body.success && !token.is_empty() => Ok(token),
        _ => Err(GraphError::Auth("Failed to authenticate with API key".into())),
    }
}

impl TokenProvider for ApiKeyTokenProvider {
    fn token(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let mut cached = self.cached.lock().await;
            if let Some(entry) = cached.as_ref() {
                if Instant::now() < entry.expires_at {
                    return Ok(entry.token.clone());
                }
            }

            let token = self.authenticate().await?;
            info!(ttl_secs = self.ttl.as_secs(), "Access token refreshed");
            *cached = Some(CachedToken {
                token: token.clone(),
                expires_at: Instant::now() + self.ttl,
            });
            Ok(token)
        })
    }
}

/// Token provider handing out a fixed token.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn token(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { Ok(self.token.clone()) })
    }
}
