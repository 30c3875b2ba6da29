//! In-process delivery backend.
//!
//! Hands reports to a [`Receiver`] living in the same process, for hosts
//! that embed the receiver or want to capture reports themselves.

use std::sync::Arc;

use async_trait::async_trait;

use super::{DeliveryClient, DeliveryOutcome, DeliveryRequest};
use crate::error::DeliveryError;

/// Accepts reports without a network hop.
#[async_trait]
pub trait Receiver: Send + Sync {
    /// Handle one report and answer like the HTTP receiver would
    async fn receive(&self, request: &DeliveryRequest) -> DeliveryOutcome;
}

/// Delivers to an in-process [`Receiver`], bounded by the request timeout.
#[derive(Clone)]
pub struct DirectDeliveryClient {
    receiver: Arc<dyn Receiver>,
}

impl DirectDeliveryClient {
    pub fn new(receiver: Arc<dyn Receiver>) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl DeliveryClient for DirectDeliveryClient {
    async fn send(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome, DeliveryError> {
        match tokio::time::timeout(request.timeout, self.receiver.receive(request)).await {
            Ok(outcome) => Ok(outcome),
            Err(_) => Ok(DeliveryOutcome::transport_failure(format!(
                "receiver did not answer within {:?}",
                request.timeout
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}
