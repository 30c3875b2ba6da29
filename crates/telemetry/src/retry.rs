//! Retry coordination for report delivery
//!
//! Wraps a [`DeliveryClient`] with a bounded retry loop and linear backoff:
//! the sleep before attempt `N+1` is `N × base_delay`. With the defaults
//! (3 attempts, 1s) a report that keeps failing is tried at t=0, t=1s and
//! t=3s, then dropped.
//!
//! Retryable receiver answers are 404, 408, 429 and any 5xx. A transport
//! failure (no response at all) is always retried. Anything else is a
//! permanent rejection and is returned after the first attempt.

use std::sync::Arc;
use std::time::Duration;

use tally_config::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, RetryConfig};
use tracing::debug;

use crate::delivery::{DeliveryClient, DeliveryOutcome, DeliveryRequest};
use crate::error::DeliveryError;

/// Classifies an HTTP status as worth retrying
pub type RetryPredicate = fn(u16) -> bool;

/// Default classification: 404, 408, 429 and 5xx are transient.
///
/// 404 is included because receivers behind a load balancer answer it
/// while a route is still being deployed.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 404 | 408 | 429) || (500..600).contains(&status)
}

/// How a single report is retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Linear backoff unit
    pub base_delay: Duration,
    pub is_retryable: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            is_retryable: is_retryable_status,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
            ..Self::default()
        }
    }

    /// Replace the status classification
    pub fn with_predicate(mut self, is_retryable: RetryPredicate) -> Self {
        self.is_retryable = is_retryable;
        self
    }

    /// Sleep after failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Whether a failed outcome may be retried
    pub fn should_retry(&self, outcome: &DeliveryOutcome) -> bool {
        outcome.is_transport_failure() || (self.is_retryable)(outcome.status_code)
    }
}

/// Delivers reports through a client, retrying transient failures.
///
/// One coordinator is shared by every job; it holds no per-report state.
pub struct RetryCoordinator {
    client: Arc<dyn DeliveryClient>,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(client: Arc<dyn DeliveryClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn client_name(&self) -> &'static str {
        self.client.name()
    }

    /// Deliver `request` with the coordinator's policy
    pub async fn execute(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome, DeliveryError> {
        self.execute_with_policy(request, &self.policy).await
    }

    /// Deliver `request` with an explicit policy.
    ///
    /// Returns the successful outcome, or the last outcome wrapped as
    /// [`DeliveryError::Transient`] (attempts exhausted) or
    /// [`DeliveryError::Permanent`] (non-retryable answer). Client errors
    /// are returned immediately without retrying.
    pub async fn execute_with_policy(
        &self,
        request: &DeliveryRequest,
        policy: &RetryPolicy,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = self.client.send(request).await?;

            if outcome.success {
                if attempt > 1 {
                    debug!(
                        endpoint = %request.endpoint,
                        attempt,
                        "report delivered after retry"
                    );
                }
                return Ok(outcome);
            }

            if !policy.should_retry(&outcome) {
                return Err(DeliveryError::Permanent { last: outcome });
            }

            if attempt >= max_attempts {
                return Err(DeliveryError::Transient {
                    attempts: attempt,
                    last: outcome,
                });
            }

            let delay = policy.delay_after(attempt);
            debug!(
                endpoint = %request.endpoint,
                attempt,
                status = outcome.status_code,
                delay_ms = delay.as_millis() as u64,
                "delivery failed, retrying after delay"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod retry_test;
