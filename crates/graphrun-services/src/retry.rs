use std::fmt;
use std::time::Duration;

use graphrun_core::config::RetryConfig;

/// A failed HTTP exchange, before it is mapped onto a collaborator error.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpFailure {
    /// Response status, or `None` when no response arrived.
    pub status: Option<u16>,
    pub message: String,
}

impl HttpFailure {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Rate limits, server errors and transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self.status {
            Some(status) => status == 429 || (500..600).contains(&status),
            None => true,
        }
    }
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl From<reqwest::Error> for HttpFailure {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => HttpFailure::status(status.as_u16(), e.to_string()),
            None => HttpFailure::transport(e.to_string()),
        }
    }
}

/// Exponential backoff with jitter for remote calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self::new(RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Whether `failure` on attempt `attempt` (0-based) should be retried.
    pub fn should_retry(&self, failure: &HttpFailure, attempt: u32) -> bool {
        failure.is_retryable() && attempt < self.config.max_retries
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .config
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.config.max_backoff_ms);
        // Add jitter: 0.8x to 1.2x
        let jitter = 0.8 + rand::random::<f64>() * 0.4;
        Duration::from_millis((base as f64 * jitter) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(HttpFailure::status(429, "slow down").is_retryable());
        assert!(HttpFailure::status(503, "unavailable").is_retryable());
        assert!(HttpFailure::transport("connection reset").is_retryable());
        assert!(!HttpFailure::status(400, "bad request").is_retryable());
        assert!(!HttpFailure::status(401, "unauthorized").is_retryable());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
        });
        let first = policy.backoff(0).as_millis();
        assert!((80..=120).contains(&first));
        let capped = policy.backoff(10).as_millis();
        assert!((800..=1200).contains(&capped));
    }

    #[test]
    fn test_should_retry_respects_budget() {
        let policy = RetryPolicy::default();
        let failure = HttpFailure::status(502, "bad gateway");
        assert!(policy.should_retry(&failure, 0));
        assert!(!policy.should_retry(&failure, policy.max_retries()));
        assert!(!RetryPolicy::none().should_retry(&failure, 0));
    }

    #[test]
    fn test_display() {
        assert_eq!(HttpFailure::status(404, "missing").to_string(), "HTTP 404: missing");
        assert_eq!(HttpFailure::transport("dns").to_string(), "dns");
    }
}
