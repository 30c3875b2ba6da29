//! Report job configuration
//!
//! Three kinds of jobs feed the receiver:
//!
//! - `[transactions]`: rolling-window counter flushed at a fixed rate
//! - `[[counts]]`: point-in-time counts queried from a registered source
//! - `[deployment]`: deployment information sent weekly at a fixed UTC time
//! - `[meta]`: node identity sent once, shortly after collection starts
//!
//! `[shutdown]` bounds how long the final flush may take when the service stops.

use chrono::Weekday;
use serde::Deserialize;
use std::time::Duration;

/// Receiver path for usage counts
pub const USAGE_COUNT_ENDPOINT: &str = "usage-counts";

/// Receiver path for deployment information
pub const DEPLOYMENT_ENDPOINT: &str = "deployment-information";

/// Receiver path for the one-shot node identity report
pub const META_ENDPOINT: &str = "meta-information";

/// Usage type tag for transaction windows
pub const TRANSACTION_TYPE: &str = "TRANSACTION";

/// Longest usage type accepted by the receiver
pub const MAX_TYPE_LEN: usize = 20;

/// Longest accepted initial delay, interval or meta delay
pub const MAX_SCHEDULE_DELAY: Duration = Duration::from_secs(366 * 24 * 60 * 60);

const HOUR: Duration = Duration::from_secs(60 * 60);

/// Rolling-window transaction counter
///
/// ```toml
/// [transactions]
/// initial_delay = "1h"
/// interval = "1h"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransactionsConfig {
    pub enabled: bool,

    /// Delay before the first flush
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Window length
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    pub endpoint: String,

    #[serde(rename = "type")]
    pub usage_type: String,
}

impl Default for TransactionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: HOUR,
            interval: HOUR,
            endpoint: USAGE_COUNT_ENDPOINT.to_string(),
            usage_type: TRANSACTION_TYPE.to_string(),
        }
    }
}

/// A count queried from a source the host registers under `name`
///
/// ```toml
/// [[counts]]
/// name = "apis"
/// type = "API_COUNT"
/// interval = "24h"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CountJobConfig {
    /// Name the host registers the count source under
    pub name: String,

    #[serde(rename = "type")]
    pub usage_type: String,

    /// Delay before the first report (default: report immediately)
    #[serde(default, with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(default = "default_count_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_usage_endpoint")]
    pub endpoint: String,
}

fn default_count_interval() -> Duration {
    24 * HOUR
}

fn default_usage_endpoint() -> String {
    USAGE_COUNT_ENDPOINT.to_string()
}

/// Weekly deployment information report
///
/// ```toml
/// [deployment]
/// weekday = "wed"
/// hour = 2
/// minute = 30
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub enabled: bool,

    /// Day of the week (UTC)
    pub weekday: Weekday,

    /// Hour of the day, 0-23 (UTC)
    pub hour: u32,

    /// Minute of the hour, 0-59
    pub minute: u32,

    pub endpoint: String,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weekday: Weekday::Wed,
            hour: 2,
            minute: 30,
            endpoint: DEPLOYMENT_ENDPOINT.to_string(),
        }
    }
}

/// One-shot node identity report
///
/// Sent once per process, `delay` after collection starts, so the receiver
/// learns about the node before its first usage window arrives.
///
/// ```toml
/// [meta]
/// delay = "5m"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    pub enabled: bool,

    #[serde(with = "humantime_serde")]
    pub delay: Duration,

    pub endpoint: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Duration::from_secs(5 * 60),
            endpoint: META_ENDPOINT.to_string(),
        }
    }
}

/// Shutdown behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound on draining a job, including its final report
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transactions_defaults() {
        let config = TransactionsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.initial_delay, Duration::from_secs(3600));
        assert_eq!(config.interval, Duration::from_secs(3600));
        assert_eq!(config.endpoint, "usage-counts");
        assert_eq!(config.usage_type, "TRANSACTION");
    }

    #[test]
    fn test_transactions_deserialize() {
        let toml = r#"
initial_delay = "30s"
interval = "5m"
type = "REQUESTS"
"#;
        let config: TransactionsConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.initial_delay, Duration::from_secs(30));
        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.usage_type, "REQUESTS");
        assert_eq!(config.endpoint, USAGE_COUNT_ENDPOINT);
    }

    #[test]
    fn test_count_job_defaults() {
        let toml = r#"
name = "apis"
type = "API_COUNT"
"#;
        let config: CountJobConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.name, "apis");
        assert_eq!(config.initial_delay, Duration::ZERO);
        assert_eq!(config.interval, Duration::from_secs(24 * 3600));
        assert_eq!(config.endpoint, USAGE_COUNT_ENDPOINT);
    }

    #[test]
    fn test_deployment_defaults() {
        let config = DeploymentConfig::default();
        assert_eq!(config.weekday, Weekday::Wed);
        assert_eq!((config.hour, config.minute), (2, 30));
    }

    #[test]
    fn test_deployment_weekday_names() {
        for (s, expected) in [
            ("mon", Weekday::Mon),
            ("Tuesday", Weekday::Tue),
            ("sun", Weekday::Sun),
        ] {
            let config: DeploymentConfig =
                toml::from_str(&format!("weekday = \"{}\"", s)).unwrap();
            assert_eq!(config.weekday, expected, "Failed for {}", s);
        }
    }

    #[test]
    fn test_meta_defaults() {
        let config = MetaConfig::default();
        assert!(config.enabled);
        assert_eq!(config.delay, Duration::from_secs(300));
        assert_eq!(config.endpoint, "meta-information");
    }

    #[test]
    fn test_meta_deserialize() {
        let config: MetaConfig = toml::from_str("delay = \"30s\"").unwrap();
        assert_eq!(config.delay, Duration::from_secs(30));
        assert_eq!(config.endpoint, META_ENDPOINT);
    }

    #[test]
    fn test_shutdown_deserialize() {
        let config: ShutdownConfig = toml::from_str("timeout = \"15s\"").unwrap();
        assert_eq!(config.timeout, Duration::from_secs(15));
    }
}
