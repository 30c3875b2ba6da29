//! HTTP delivery backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::CONTENT_TYPE;
use tracing::trace;

use super::{DeliveryClient, DeliveryOutcome, DeliveryRequest};
use crate::endpoint::{self, CONTENT_TYPE_JSON};
use crate::error::DeliveryError;

/// Posts JSON reports to `receiver_url` + endpoint.
///
/// The per-attempt timeout comes from the request, so one client serves
/// every job.
#[derive(Debug, Clone)]
pub struct HttpDeliveryClient {
    client: reqwest::Client,
    base_url: Url,
    headers: BTreeMap<String, String>,
}

impl HttpDeliveryClient {
    /// Create a client for `base_url`, sending `headers` with every request
    pub fn new(base_url: &str, headers: BTreeMap<String, String>) -> Result<Self, DeliveryError> {
        let base_url = endpoint::parse_base(base_url)?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("tally/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeliveryError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            headers,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn send(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome, DeliveryError> {
        let url = endpoint::resolve(&self.base_url, &request.endpoint)?;

        let mut builder = self
            .client
            .post(url.clone())
            .timeout(request.timeout)
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON);

        // Request headers win over client-wide ones
        let mut headers = self.headers.clone();
        headers.extend(request.headers.clone());
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = match builder.json(&request.payload).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Err(DeliveryError::Config(format!("invalid request to {}: {}", url, e)));
            }
            Err(e) => {
                trace!(url = %url, error = %e, "request failed before a response");
                return Ok(DeliveryOutcome::transport_failure(e.to_string()));
            }
        };

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        trace!(url = %url, status, "receiver responded");

        Ok(DeliveryOutcome::from_response(status, body))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
