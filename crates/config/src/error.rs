//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A required field is missing
    #[error("{section} is missing required field '{field}'")]
    MissingField {
        /// Config section (e.g., "delivery")
        section: &'static str,
        field: &'static str,
    },

    /// A field holds a value outside its allowed range
    #[error("{section} has invalid {field}: {message}")]
    InvalidValue {
        section: &'static str,
        field: &'static str,
        message: String,
    },

    /// Two count jobs share a source name
    #[error("count job '{name}' is configured more than once")]
    DuplicateCountJob { name: String },
}

impl ConfigError {
    /// Create a MissingField error
    pub fn missing_field(section: &'static str, field: &'static str) -> Self {
        Self::MissingField { section, field }
    }

    /// Create an InvalidValue error
    pub fn invalid_value(
        section: &'static str,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            section,
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_error() {
        let err = ConfigError::missing_field("delivery", "receiver_url");
        assert!(err.to_string().contains("delivery"));
        assert!(err.to_string().contains("receiver_url"));
    }

    #[test]
    fn test_invalid_value_error() {
        let err = ConfigError::invalid_value("deployment", "hour", "must be below 24");
        assert_eq!(err.to_string(), "deployment has invalid hour: must be below 24");
    }

    #[test]
    fn test_duplicate_count_job_error() {
        let err = ConfigError::DuplicateCountJob {
            name: "apis".into(),
        };
        assert!(err.to_string().contains("'apis'"));
    }
}
