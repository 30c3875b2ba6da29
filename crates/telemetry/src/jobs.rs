//! Report jobs
//!
//! Each job builds one payload per cycle and hands it to the shared
//! [`RetryCoordinator`]. Delivery failures are logged and the report is
//! dropped; the next cycle starts fresh.
//!
//! | Job                   | Payload                 | Final cycle on stop |
//! |-----------------------|-------------------------|---------------------|
//! | `WindowReportJob`     | aggregator window       | yes (last flush)    |
//! | `CountReportJob`      | count from a source     | no                  |
//! | `DeploymentReportJob` | deployment information  | no                  |
//!
//! [`MetaReportJob`] is not scheduled: the service sends it once, a fixed
//! delay after collection starts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::aggregator::IntervalAggregator;
use crate::delivery::{DeliveryOutcome, DeliveryRequest};
use crate::error::{CountSourceError, DeliveryError};
use crate::payload::{DeploymentInformation, MetaInformation, NodeIdentity, UsageCount};
use crate::retry::RetryCoordinator;
use crate::scheduler::Job;

/// Everything a job needs to address and send a report.
#[derive(Clone)]
pub struct ReportContext {
    pub identity: NodeIdentity,
    pub delivery: Arc<RetryCoordinator>,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl ReportContext {
    pub fn new(identity: NodeIdentity, delivery: Arc<RetryCoordinator>, timeout: Duration) -> Self {
        Self {
            identity,
            delivery,
            timeout,
        }
    }

    /// Deliver one payload and log the result
    pub async fn deliver<T: Serialize>(
        &self,
        job: &str,
        endpoint: &str,
        payload: &T,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let request = DeliveryRequest::json(endpoint, payload)?.with_timeout(self.timeout);
        let result = self.delivery.execute(&request).await;

        match &result {
            Ok(outcome) => {
                debug!(job, endpoint, status = outcome.status_code, "report delivered");
            }
            Err(e @ DeliveryError::Transient { .. }) => {
                warn!(job, endpoint, error = %e, "report dropped");
            }
            Err(e) => {
                error!(job, endpoint, error = %e, "report not delivered");
            }
        }
        result
    }
}

/// Flushes an [`IntervalAggregator`] and reports the closed window.
///
/// Empty windows are reported too; a count of zero tells the receiver the
/// node is alive.
pub struct WindowReportJob {
    name: String,
    aggregator: Arc<IntervalAggregator>,
    usage_type: String,
    endpoint: String,
    context: ReportContext,
}

impl WindowReportJob {
    pub fn new(
        aggregator: Arc<IntervalAggregator>,
        usage_type: impl Into<String>,
        endpoint: impl Into<String>,
        context: ReportContext,
    ) -> Self {
        let usage_type = usage_type.into();
        Self {
            name: format!("window:{}", usage_type),
            aggregator,
            usage_type,
            endpoint: endpoint.into(),
            context,
        }
    }

    /// Close the open window and deliver it
    pub async fn report(&self) -> Result<DeliveryOutcome, DeliveryError> {
        let snapshot = self.aggregator.flush_and_reset();
        debug!(
            job = %self.name,
            count = snapshot.count(),
            sequence = %snapshot.sequence_id(),
            "window closed"
        );
        let payload = UsageCount::from_snapshot(&self.context.identity, &self.usage_type, &snapshot);
        self.context.deliver(&self.name, &self.endpoint, &payload).await
    }
}

#[async_trait]
impl Job for WindowReportJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) {
        let _ = self.report().await;
    }

    async fn finish(&self) {
        let _ = self.report().await;
    }
}

/// Supplies a point-in-time count, e.g. the number of deployed APIs.
pub trait CountSource: Send + Sync {
    fn current_count(&self) -> Result<u64, CountSourceError>;
}

impl<F> CountSource for F
where
    F: Fn() -> Result<u64, CountSourceError> + Send + Sync,
{
    fn current_count(&self) -> Result<u64, CountSourceError> {
        self()
    }
}

/// Queries a [`CountSource`] and reports the value.
pub struct CountReportJob {
    name: String,
    source: Arc<dyn CountSource>,
    usage_type: String,
    endpoint: String,
    context: ReportContext,
}

impl CountReportJob {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn CountSource>,
        usage_type: impl Into<String>,
        endpoint: impl Into<String>,
        context: ReportContext,
    ) -> Self {
        Self {
            name: format!("count:{}", name.into()),
            source,
            usage_type: usage_type.into(),
            endpoint: endpoint.into(),
            context,
        }
    }

    /// Query the source and deliver the count.
    ///
    /// Returns `Ok(None)` when the source failed and the cycle was skipped.
    pub async fn report(&self) -> Result<Option<DeliveryOutcome>, DeliveryError> {
        let count = match self.source.current_count() {
            Ok(count) => count,
            Err(e) => {
                warn!(job = %self.name, error = %e, "count unavailable, skipping cycle");
                return Ok(None);
            }
        };

        let payload = UsageCount::new(&self.context.identity, &self.usage_type, count);
        self.context
            .deliver(&self.name, &self.endpoint, &payload)
            .await
            .map(Some)
    }
}

#[async_trait]
impl Job for CountReportJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) {
        let _ = self.report().await;
    }
}

/// Reports deployment information.
pub struct DeploymentReportJob {
    endpoint: String,
    context: ReportContext,
}

impl DeploymentReportJob {
    pub fn new(endpoint: impl Into<String>, context: ReportContext) -> Self {
        Self {
            endpoint: endpoint.into(),
            context,
        }
    }

    pub async fn report(&self) -> Result<DeliveryOutcome, DeliveryError> {
        let payload = DeploymentInformation::collect(&self.context.identity)?;
        self.context.deliver(self.name(), &self.endpoint, &payload).await
    }
}

#[async_trait]
impl Job for DeploymentReportJob {
    fn name(&self) -> &str {
        "deployment"
    }

    async fn run(&self) {
        let _ = self.report().await;
    }
}

/// Sends the node identity once, after a delay.
pub struct MetaReportJob {
    endpoint: String,
    delay: Duration,
    context: ReportContext,
}

impl MetaReportJob {
    pub fn new(endpoint: impl Into<String>, delay: Duration, context: ReportContext) -> Self {
        Self {
            endpoint: endpoint.into(),
            delay,
            context,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn report(&self) -> Result<DeliveryOutcome, DeliveryError> {
        let payload = MetaInformation::new(&self.context.identity);
        self.context.deliver("meta", &self.endpoint, &payload).await
    }

    /// Wait out the delay, then report. Failure is not fatal; every later
    /// report carries the same identity.
    pub async fn run_once(&self) {
        tokio::time::sleep(self.delay).await;
        if self.report().await.is_err() {
            warn!(endpoint = %self.endpoint, "meta information not delivered, continuing");
        }
    }
}
