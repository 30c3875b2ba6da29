//! Tally Configuration
//!
//! TOML-based configuration with sensible defaults. Every section is
//! optional; only the receiver URL is required for HTTP delivery.
//!
//! # Parsing
//!
//! ```
//! use tally_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str(
//!     "[delivery]\nreceiver_url = \"https://receiver.example.com/receiver/\"",
//! )
//! .unwrap();
//! assert_eq!(config.delivery.retry.max_attempts, 3);
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [log]
//! level = "info"
//!
//! [usage]
//! product = "gateway"
//!
//! [delivery]
//! receiver_url = "https://receiver.example.com/receiver/"
//!
//! [delivery.retry]
//! max_attempts = 3
//! base_delay = "1s"
//!
//! [transactions]
//! interval = "1h"
//!
//! [[counts]]
//! name = "apis"
//! type = "API_COUNT"
//! interval = "24h"
//!
//! [deployment]
//! weekday = "wed"
//! hour = 2
//! minute = 30
//!
//! [meta]
//! delay = "5m"
//!
//! [shutdown]
//! timeout = "60s"
//! ```

mod delivery;
mod error;
mod jobs;
mod logging;
mod usage;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use delivery::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT, DeliveryConfig, DeliveryMode,
    RetryConfig,
};
pub use error::{ConfigError, Result};
pub use jobs::{
    CountJobConfig, DEPLOYMENT_ENDPOINT, DeploymentConfig, MAX_SCHEDULE_DELAY, MAX_TYPE_LEN,
    META_ENDPOINT, MetaConfig, ShutdownConfig, TRANSACTION_TYPE, TransactionsConfig,
    USAGE_COUNT_ENDPOINT,
};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use usage::{DEFAULT_PRODUCT, UsageConfig};

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,

    /// Reporter identity and master switch
    pub usage: UsageConfig,

    /// Delivery backend and retry policy
    pub delivery: DeliveryConfig,

    /// Rolling-window transaction counter
    pub transactions: TransactionsConfig,

    /// Point-in-time counts queried from registered sources
    pub counts: Vec<CountJobConfig>,

    /// Weekly deployment information report
    pub deployment: DeploymentConfig,

    /// One-shot node identity report
    pub meta: MetaConfig,

    /// Shutdown drain bound
    pub shutdown: ShutdownConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, contains invalid TOML,
    /// or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
