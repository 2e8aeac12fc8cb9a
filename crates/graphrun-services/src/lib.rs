pub mod auth;
pub mod client;
pub mod events;
pub mod retry;
pub mod sandbox;
pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use graphrun_core::config::ServiceConfig;
use graphrun_core::error::{GraphError, Result};
use graphrun_core::traits::TokenProvider;

pub use auth::{ApiKeyTokenProvider, StaticTokenProvider};
pub use client::ServiceClient;
pub use retry::RetryPolicy;
pub use sandbox::ProcessSandbox;

/// Create the token provider for `config`: a fixed access token when one is
/// set, else an API-key exchange.
pub fn create_token_provider(config: &ServiceConfig) -> Result<Arc<dyn TokenProvider>> {
    if let Some(token) = &config.access_token {
        return Ok(Arc::new(StaticTokenProvider::new(token.clone())));
    }
    match &config.api_key {
        Some(key) => Ok(Arc::new(ApiKeyTokenProvider::new(
            config.base_url.clone(),
            key.clone(),
            Duration::from_secs(config.token_ttl_secs),
        ))),
        None => Err(GraphError::Config(
            "service.api_key or service.access_token is required".into(),
        )),
    }
}
