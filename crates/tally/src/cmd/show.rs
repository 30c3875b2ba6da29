//! Show command - Display exactly what would be reported
//!
//! Builds the payloads from the current config and environment without
//! sending anything.
//!
//! # Usage
//!
//! ```bash
//! tally show
//! tally show --json
//! ```

use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde_json::json;
use tally_config::Config;
use tally_telemetry::{
    DeploymentInformation, IntervalAggregator, MetaInformation, NodeIdentity, UsageCount,
};

/// Show command arguments
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(config_path: Option<&Path>, args: ShowArgs) -> Result<()> {
    let config = super::load_config(config_path)?;
    let identity = NodeIdentity::from_config(&config.usage);
    let reports = collect_reports(&config, &identity)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_reports(&config, &identity, &reports);
    }
    Ok(())
}

/// Payloads keyed by endpoint, as they would be sent right now
fn collect_reports(config: &Config, identity: &NodeIdentity) -> Result<serde_json::Value> {
    let mut usage_counts = Vec::new();

    if config.transactions.enabled {
        // Nothing is counted outside a running service: an empty window
        let snapshot = IntervalAggregator::new().flush_and_reset();
        usage_counts.push(UsageCount::from_snapshot(
            identity,
            &config.transactions.usage_type,
            &snapshot,
        ));
    }
    for job in &config.counts {
        usage_counts.push(UsageCount::new(identity, &job.usage_type, 0));
    }

    let deployment = if config.deployment.enabled {
        Some(DeploymentInformation::collect(identity)?)
    } else {
        None
    };

    let meta = config.meta.enabled.then(|| MetaInformation::new(identity));

    Ok(json!({
        "metaInformation": meta,
        "usageCounts": usage_counts,
        "deploymentInformation": deployment,
    }))
}

fn print_reports(config: &Config, identity: &NodeIdentity, reports: &serde_json::Value) {
    println!("Tally Usage Report");
    println!("==================");
    println!();
    println!("Status: {}", if config.usage.enabled { "enabled" } else { "disabled" });
    println!("Node:     {}", identity.node_id());
    println!("Product:  {}", identity.product());
    match &config.delivery.receiver_url {
        Some(url) => println!("Receiver: {} ({:?})", url, config.delivery.mode),
        None => println!("Receiver: (not configured, {:?})", config.delivery.mode),
    }
    println!();

    if !reports["metaInformation"].is_null() {
        println!(
            "Meta information: sent once, {:?} after start",
            config.meta.delay
        );
        println!();
    }

    if let Some(counts) = reports["usageCounts"].as_array() {
        println!("Usage counts ({}):", counts.len());
        for count in counts {
            println!(
                "  {:<20} count={}",
                count["type"].as_str().unwrap_or("-"),
                count["count"]
            );
        }
        println!();
    }

    let deployment = &reports["deploymentInformation"];
    if !deployment.is_null() {
        let info = &deployment["deploymentInfo"];
        println!("Deployment:");
        println!("  Version:  {}", info["version"].as_str().unwrap_or("-"));
        println!(
            "  Platform: {}/{}",
            info["os"].as_str().unwrap_or("-"),
            info["arch"].as_str().unwrap_or("-")
        );
        println!("  CPUs:     {}", info["cpuCores"]);
        println!("  Memory:   {} bytes", info["memoryBytes"]);
        println!("  Hash:     {}", deployment["deploymentInfoHash"].as_str().unwrap_or("-"));
        println!();
    }

    println!("Run 'tally show --json' to see the exact payloads.");
}
