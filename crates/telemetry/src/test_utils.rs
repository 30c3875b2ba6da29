//! Test doubles for delivery.
//!
//! `ScriptedClient` answers with a fixed script of status codes and records
//! every request together with the (Tokio) instant it arrived, so retry and
//! scheduling tests can assert exact timings under paused time.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::delivery::{DeliveryClient, DeliveryOutcome, DeliveryRequest};
use crate::error::DeliveryError;

/// Status 0 in a script means a transport failure
pub const TRANSPORT_FAILURE: u16 = 0;

pub struct ScriptedClient {
    script: Mutex<VecDeque<u16>>,
    /// Answer once the script runs out
    fallback: u16,
    calls: Mutex<Vec<(Instant, DeliveryRequest)>>,
}

impl ScriptedClient {
    /// Always answer `status`
    pub fn always(status: u16) -> Self {
        Self::scripted(&[], status)
    }

    /// Answer `script` in order, then `fallback` forever
    pub fn scripted(script: &[u16], fallback: u16) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.payload.clone())
            .collect()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.endpoint.clone())
            .collect()
    }
}

#[async_trait]
impl DeliveryClient for ScriptedClient {
    async fn send(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome, DeliveryError> {
        self.calls.lock().unwrap().push((Instant::now(), request.clone()));
        let status = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
        if status == TRANSPORT_FAILURE {
            return Ok(DeliveryOutcome::transport_failure("connection reset"));
        }
        Ok(DeliveryOutcome::from_response(status, ""))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// A client whose requests can never be built
pub struct MisconfiguredClient;

#[async_trait]
impl DeliveryClient for MisconfiguredClient {
    async fn send(&self, _request: &DeliveryRequest) -> Result<DeliveryOutcome, DeliveryError> {
        Err(DeliveryError::Config("no receiver URL".into()))
    }

    fn name(&self) -> &'static str {
        "misconfigured"
    }
}
