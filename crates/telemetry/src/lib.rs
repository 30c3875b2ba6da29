//! Tally telemetry - usage aggregation with best-effort, retried delivery.
//!
//! Key principles:
//!
//! - **Never block producers**: counting is a single atomic add
//! - **Exactly one window per increment**: windows are contiguous and
//!   drained with an atomic swap, so no count is lost or double-reported
//! - **Best effort**: a report that cannot be delivered after its retries
//!   is logged and dropped, never queued
//! - **One collector per cluster**: only the coordinator node reports
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   flush   ┌──────────────┐   execute   ┌──────────────────┐
//! │  Aggregator  │──────────▶│     Job      │────────────▶│ RetryCoordinator │
//! │ (lock-free)  │           │ (scheduled)  │             │  (linear backoff)│
//! └──────────────┘           └──────────────┘             └──────────────────┘
//!        ▲                          ▲                              │
//!        │ add(n)                   │ cadence                      │ send
//!        │                          │                              ▼
//! ┌──────────────┐           ┌──────────────┐             ┌──────────────────┐
//! │  Producers   │           │  Scheduler   │             │ DeliveryBackend  │
//! │  (any task)  │           │ (ClusterGate)│             │  (http / direct) │
//! └──────────────┘           └──────────────┘             └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tally_telemetry::{
//!     HttpDeliveryClient, IntervalAggregator, NodeIdentity, ReportContext, RetryCoordinator,
//!     RetryPolicy, Scheduler, Cadence, WindowReportJob,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpDeliveryClient::new("https://receiver.example.com/receiver/", Default::default())?;
//! let delivery = Arc::new(RetryCoordinator::new(Arc::new(client), RetryPolicy::default()));
//! let context = ReportContext::new(NodeIdentity::new("node-1", "gateway"), delivery, Duration::from_secs(10));
//!
//! let aggregator = Arc::new(IntervalAggregator::new());
//! let job = WindowReportJob::new(aggregator.clone(), "TRANSACTION", "usage-counts", context);
//! let cadence = Cadence::fixed_rate(Duration::from_secs(3600), Duration::from_secs(3600))?;
//! let scheduler = Scheduler::new(Arc::new(job), cadence, Duration::from_secs(60));
//!
//! scheduler.start()?;
//! aggregator.add(1); // from any thread, never blocks
//! scheduler.stop().await; // final flush
//! # Ok(())
//! # }
//! ```
//!
//! Most hosts use [`UsageService`], which builds all of the above from a
//! [`tally_config::Config`].

pub mod aggregator;
pub mod cluster;
pub mod delivery;
pub mod endpoint;
pub mod error;
pub mod jobs;
pub mod payload;
pub mod retry;
pub mod scheduler;
pub mod service;

#[cfg(test)]
pub(crate) mod test_utils;

pub use aggregator::{CountSnapshot, IntervalAggregator, SequenceId};
pub use cluster::{ClusterGate, ClusterMembership, GateState};
pub use delivery::{
    DeliveryBackend, DeliveryClient, DeliveryOutcome, DeliveryRequest, DirectDeliveryClient,
    HttpDeliveryClient, Receiver,
};
pub use error::{CountSourceError, DeliveryError, SchedulerError, TelemetryError};
pub use jobs::{
    CountReportJob, CountSource, DeploymentReportJob, MetaReportJob, ReportContext,
    WindowReportJob,
};
pub use payload::{
    DeploymentInfo, DeploymentInformation, MetaInformation, NodeIdentity, UsageCount,
};
pub use retry::{RetryCoordinator, RetryPolicy, is_retryable_status};
pub use scheduler::{Cadence, FixedRate, Job, LifecycleState, MAX_DELAY, Scheduler, WeeklyTime};
pub use service::{UsageService, UsageServiceBuilder};
