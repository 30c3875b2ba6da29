//! Send command - Deliver a single report now
//!
//! Uses the configured receiver and retry policy, so it doubles as a
//! connectivity check.
//!
//! # Usage
//!
//! ```bash
//! # One transaction count
//! tally send
//!
//! # A specific usage type and count
//! tally send --count 12 --type API_COUNT
//!
//! # Deployment information instead of a count
//! tally send --deployment
//!
//! # Node identity, as sent once after start
//! tally send --meta
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tally_config::Config;
use tally_telemetry::{
    DeliveryBackend, DeploymentReportJob, MetaReportJob, NodeIdentity, ReportContext,
    RetryCoordinator, RetryPolicy, UsageCount,
};

/// Send command arguments
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Count to report
    #[arg(long, default_value_t = 1)]
    pub count: u64,

    /// Usage type (default: the transactions type)
    #[arg(long = "type")]
    pub usage_type: Option<String>,

    /// Endpoint relative to the receiver URL
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Send deployment information instead of a usage count
    #[arg(long, conflicts_with_all = ["count", "usage_type"])]
    pub deployment: bool,

    /// Send meta information instead of a usage count
    #[arg(long, conflicts_with_all = ["count", "usage_type", "deployment"])]
    pub meta: bool,
}

pub async fn run(config: Config, args: SendArgs) -> Result<()> {
    let backend = DeliveryBackend::from_config(&config.delivery, None)
        .context("failed to create delivery backend")?;
    let delivery = Arc::new(RetryCoordinator::new(
        Arc::new(backend),
        RetryPolicy::from_config(&config.delivery.retry),
    ));
    let context = ReportContext::new(
        NodeIdentity::from_config(&config.usage),
        delivery,
        config.delivery.timeout,
    );

    let result = if args.meta {
        let endpoint = args.endpoint.unwrap_or(config.meta.endpoint);
        MetaReportJob::new(endpoint, Duration::ZERO, context).report().await
    } else if args.deployment {
        let endpoint = args.endpoint.unwrap_or(config.deployment.endpoint);
        DeploymentReportJob::new(endpoint, context).report().await
    } else {
        let usage_type = args
            .usage_type
            .unwrap_or(config.transactions.usage_type);
        let endpoint = args.endpoint.unwrap_or(config.transactions.endpoint);
        let payload = UsageCount::new(&context.identity, &usage_type, args.count);
        context.deliver("send", &endpoint, &payload).await
    };
    let outcome = result.context("report was not delivered")?;

    println!("delivered: {}", outcome);
    Ok(())
}
