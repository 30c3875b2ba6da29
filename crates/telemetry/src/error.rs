//! Telemetry error types.

use tally_config::ConfigError;
use thiserror::Error;

use crate::delivery::DeliveryOutcome;

/// Errors returned when delivering a single report.
///
/// Receiver-side failures are carried as a [`DeliveryOutcome`] so callers
/// can log exactly what the receiver answered.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Every attempt failed with a retryable status
    #[error("report dropped after {attempts} attempts, last: {last}")]
    Transient {
        attempts: u32,
        last: DeliveryOutcome,
    },

    /// Receiver rejected the report with a non-retryable status
    #[error("report rejected by receiver: {last}")]
    Permanent { last: DeliveryOutcome },

    /// Backend cannot be used (invalid URL, client build failure)
    #[error("invalid delivery configuration: {0}")]
    Config(String),

    /// Payload could not be encoded as JSON
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DeliveryError {
    /// Last outcome seen from the receiver, if any
    pub fn last_outcome(&self) -> Option<&DeliveryOutcome> {
        match self {
            Self::Transient { last, .. } | Self::Permanent { last } => Some(last),
            Self::Config(_) | Self::Serialization(_) => None,
        }
    }
}

impl From<serde_json::Error> for DeliveryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Failure reported by a [`CountSource`](crate::jobs::CountSource).
///
/// The affected cycle is skipped; the next one queries again.
#[derive(Debug, Error)]
pub enum CountSourceError {
    #[error("count query failed: {0}")]
    Query(String),

    #[error("count source unavailable")]
    Unavailable,
}

/// Errors raised by the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `start` was called outside a Tokio runtime
    #[error("scheduler '{job}' requires a Tokio runtime")]
    NoRuntime { job: String },

    /// A fixed-rate cadence needs a non-zero period
    #[error("period must be greater than zero")]
    ZeroPeriod,

    /// Initial delay or period beyond [`MAX_DELAY`](crate::scheduler::MAX_DELAY)
    #[error("{0:?} exceeds the longest supported schedule delay")]
    DelayTooLong(std::time::Duration),

    /// Weekly cadence outside 00:00-23:59
    #[error("invalid weekly time {hour:02}:{minute:02}")]
    InvalidTime { hour: u32, minute: u32 },
}

/// Errors that can occur while building or running the usage service.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// `[[counts]]` names a source the host never registered
    #[error("no count source registered for '{0}'")]
    UnknownCountSource(String),

    /// `mode = "direct"` without an in-process receiver
    #[error("direct delivery requires a registered receiver")]
    MissingReceiver,
}
