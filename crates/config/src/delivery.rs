//! Delivery configuration
//!
//! Selects the delivery backend and tunes the retry policy applied to every
//! report.
//!
//! # Defaults
//!
//! - `mode`: http
//! - `timeout`: 10s per attempt
//! - `retry.max_attempts`: 3
//! - `retry.base_delay`: 1s (sleep before attempt N+1 is N × base_delay)

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of attempts per report
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff unit
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Which backend carries reports to the receiver
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// JSON POST to `receiver_url`
    #[default]
    Http,
    /// In-process receiver registered by the host application
    Direct,
}

/// Retry policy settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Linear backoff unit
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

/// Delivery configuration
///
/// ```toml
/// [delivery]
/// mode = "http"
/// receiver_url = "https://receiver.example.com/receiver/"
/// timeout = "5s"
/// headers = { "X-Api-Key" = "secret" }
///
/// [delivery.retry]
/// max_attempts = 5
/// base_delay = "500ms"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub mode: DeliveryMode,

    /// Base URL that report endpoints are resolved against.
    /// Required for `mode = "http"`.
    pub receiver_url: Option<String>,

    /// Timeout for a single attempt
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,

    pub retry: RetryConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Http,
            receiver_url: None,
            timeout: DEFAULT_TIMEOUT,
            headers: BTreeMap::new(),
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeliveryConfig::default();
        assert_eq!(config.mode, DeliveryMode::Http);
        assert!(config.receiver_url.is_none());
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
mode = "direct"
receiver_url = "http://localhost:9000/receiver/"
timeout = "5s"
headers = { "X-Api-Key" = "secret" }

[retry]
max_attempts = 5
base_delay = "500ms"
"#;
        let config: DeliveryConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.mode, DeliveryMode::Direct);
        assert_eq!(
            config.receiver_url.as_deref(),
            Some("http://localhost:9000/receiver/")
        );
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.headers.get("X-Api-Key").map(String::as_str), Some("secret"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_partial_retry_keeps_defaults() {
        let config: DeliveryConfig = toml::from_str("[retry]\nmax_attempts = 1").unwrap();
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.base_delay, DEFAULT_BASE_DELAY);
    }
}
