//! Next-run command - Show when each job would first run
//!
//! Computed as if the reporter started now.
//!
//! # Usage
//!
//! ```bash
//! tally next-run
//! tally next-run --json
//!
//! # Try another deployment slot
//! tally next-run --weekday fri --hour 23 --minute 0
//! ```

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc, Weekday};
use clap::Args;
use serde_json::json;
use tally_config::Config;
use tally_telemetry::Cadence;

/// Next-run command arguments
#[derive(Args, Debug)]
pub struct NextRunArgs {
    /// Override the deployment report weekday (UTC)
    #[arg(long)]
    pub weekday: Option<Weekday>,

    /// Override the deployment report hour (UTC)
    #[arg(long)]
    pub hour: Option<u32>,

    /// Override the deployment report minute
    #[arg(long)]
    pub minute: Option<u32>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// A configured job and when it first runs
struct Planned {
    job: String,
    cadence: String,
    first_run: DateTime<Utc>,
}

pub fn run(config_path: Option<&Path>, args: NextRunArgs) -> Result<()> {
    let mut config = super::load_config(config_path)?;
    let deployment = &mut config.deployment;
    if let Some(weekday) = args.weekday {
        deployment.weekday = weekday;
    }
    if let Some(hour) = args.hour {
        deployment.hour = hour;
    }
    if let Some(minute) = args.minute {
        deployment.minute = minute;
    }

    let plan = plan(&config, Utc::now())?;

    if args.json {
        let jobs: Vec<_> = plan
            .iter()
            .map(|p| {
                json!({
                    "job": p.job,
                    "cadence": p.cadence,
                    "firstRun": p.first_run,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if plan.is_empty() {
        println!("No jobs enabled.");
        return Ok(());
    }
    for p in &plan {
        println!(
            "{:<24} {}  ({})",
            p.job,
            p.first_run.format("%Y-%m-%d %H:%M:%S UTC"),
            p.cadence
        );
    }
    Ok(())
}

fn plan(config: &Config, now: DateTime<Utc>) -> Result<Vec<Planned>> {
    let mut jobs = Vec::new();
    let mut push = |job: String, cadence: Cadence| {
        let delay = TimeDelta::from_std(cadence.initial_delay(now)).unwrap_or(TimeDelta::zero());
        jobs.push(Planned {
            job,
            cadence: cadence.to_string(),
            first_run: now + delay,
        });
    };

    if config.transactions.enabled {
        let tx = &config.transactions;
        push(
            format!("window:{}", tx.usage_type),
            Cadence::fixed_rate(tx.initial_delay, tx.interval)?,
        );
    }
    for count in &config.counts {
        push(
            format!("count:{}", count.name),
            Cadence::fixed_rate(count.initial_delay, count.interval)?,
        );
    }
    if config.deployment.enabled {
        let d = &config.deployment;
        push(
            "deployment".to_string(),
            Cadence::weekly(d.weekday, d.hour, d.minute)?,
        );
    }
    if config.meta.enabled {
        let delay = TimeDelta::from_std(config.meta.delay).unwrap_or(TimeDelta::zero());
        jobs.push(Planned {
            job: "meta".to_string(),
            cadence: "once".to_string(),
            first_run: now + delay,
        });
    }

    Ok(jobs)
}
