//! Report delivery
//!
//! A [`DeliveryClient`] performs exactly one attempt per `send`. Retrying is
//! the job of the [`RetryCoordinator`](crate::RetryCoordinator).
//!
//! Two backends exist:
//!
//! | Backend  | Transport                                   |
//! |----------|---------------------------------------------|
//! | `Http`   | JSON POST to `receiver_url` + endpoint      |
//! | `Direct` | In-process [`Receiver`] registered by host  |
//!
//! Receiver failures (non-2xx, timeouts, refused connections) are returned
//! as an unsuccessful [`DeliveryOutcome`], never as an error. A transport
//! failure has `status_code == 0`.

mod direct;
mod http;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tally_config::{DeliveryConfig, DeliveryMode};

use crate::error::{DeliveryError, TelemetryError};

pub use direct::{DirectDeliveryClient, Receiver};
pub use http::HttpDeliveryClient;

/// A single report addressed to a receiver endpoint.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub endpoint: String,
    pub payload: serde_json::Value,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl DeliveryRequest {
    /// Encode `payload` as JSON for `endpoint`
    pub fn json<T: Serialize>(endpoint: impl Into<String>, payload: &T) -> Result<Self, DeliveryError> {
        Ok(Self {
            endpoint: endpoint.into(),
            payload: serde_json::to_value(payload)?,
            headers: BTreeMap::new(),
            timeout: tally_config::DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// HTTP status, or 0 when no response was received
    pub status_code: u16,
    pub body: String,
    pub success: bool,
    pub error_message: Option<String>,
}

impl DeliveryOutcome {
    /// Outcome for a response from the receiver
    pub fn from_response(status_code: u16, body: impl Into<String>) -> Self {
        let success = (200..300).contains(&status_code);
        Self {
            status_code,
            body: body.into(),
            success,
            error_message: (!success).then(|| format!("receiver returned status {}", status_code)),
        }
    }

    /// Outcome for an attempt that never got a response
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self {
            status_code: 0,
            body: String::new(),
            success: false,
            error_message: Some(message.into()),
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status_code == 0
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_transport_failure() {
            return write!(
                f,
                "transport error: {}",
                self.error_message.as_deref().unwrap_or("unknown")
            );
        }
        write!(f, "HTTP {}", self.status_code)?;
        if !self.body.is_empty() {
            write!(f, " ({})", self.body)?;
        }
        Ok(())
    }
}

/// One delivery attempt to a receiver.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Send `request` once.
    ///
    /// `Err` is reserved for requests that can never succeed (bad URL,
    /// unusable client); everything the receiver answers is an outcome.
    async fn send(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome, DeliveryError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Delivery backend selected by `[delivery] mode`.
pub enum DeliveryBackend {
    Http(HttpDeliveryClient),
    Direct(DirectDeliveryClient),
}

impl DeliveryBackend {
    /// Build the configured backend.
    ///
    /// `receiver` is required for direct mode and ignored otherwise.
    pub fn from_config(
        config: &DeliveryConfig,
        receiver: Option<Arc<dyn Receiver>>,
    ) -> Result<Self, TelemetryError> {
        match config.mode {
            DeliveryMode::Http => {
                let url = config.receiver_url.as_deref().ok_or_else(|| {
                    tally_config::ConfigError::missing_field("delivery", "receiver_url")
                })?;
                Ok(Self::Http(HttpDeliveryClient::new(url, config.headers.clone())?))
            }
            DeliveryMode::Direct => {
                let receiver = receiver.ok_or(TelemetryError::MissingReceiver)?;
                Ok(Self::Direct(DirectDeliveryClient::new(receiver)))
            }
        }
    }
}

#[async_trait]
impl DeliveryClient for DeliveryBackend {
    async fn send(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome, DeliveryError> {
        match self {
            Self::Http(client) => client.send(request).await,
            Self::Direct(client) => client.send(request).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Http(client) => client.name(),
            Self::Direct(client) => client.name(),
        }
    }
}
