//! Configuration validation
//!
//! Rejects configurations that would otherwise only fail at report time:
//! - HTTP delivery without an absolute http(s) receiver URL
//! - Retry policy with zero attempts
//! - Zero-length windows or report intervals, and delays longer than a year
//! - Weekly schedule outside 00:00-23:59
//! - Empty product name, over-long usage types, duplicate count jobs

use crate::Config;
use crate::delivery::DeliveryMode;
use crate::error::{ConfigError, Result};
use crate::jobs::{MAX_SCHEDULE_DELAY, MAX_TYPE_LEN};
use std::collections::HashSet;
use std::time::Duration;

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_usage(config)?;
    validate_delivery(config)?;
    validate_jobs(config)?;
    Ok(())
}

fn validate_usage(config: &Config) -> Result<()> {
    if config.usage.product.trim().is_empty() {
        return Err(ConfigError::invalid_value(
            "usage",
            "product",
            "must not be empty",
        ));
    }
    Ok(())
}

fn validate_delivery(config: &Config) -> Result<()> {
    let delivery = &config.delivery;

    if delivery.mode == DeliveryMode::Http {
        let url = delivery
            .receiver_url
            .as_deref()
            .ok_or_else(|| ConfigError::missing_field("delivery", "receiver_url"))?;

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::invalid_value(
                "delivery",
                "receiver_url",
                format!("'{}' is not an absolute http(s) URL", url),
            ));
        }
    }

    if delivery.retry.max_attempts == 0 {
        return Err(ConfigError::invalid_value(
            "delivery",
            "retry.max_attempts",
            "must be at least 1",
        ));
    }

    if delivery.retry.base_delay > MAX_SCHEDULE_DELAY {
        return Err(ConfigError::invalid_value(
            "delivery",
            "retry.base_delay",
            "must not exceed one year",
        ));
    }

    if delivery.timeout.is_zero() {
        return Err(ConfigError::invalid_value(
            "delivery",
            "timeout",
            "must be greater than zero",
        ));
    }

    Ok(())
}

fn validate_jobs(config: &Config) -> Result<()> {
    let tx = &config.transactions;
    if tx.enabled {
        if tx.interval.is_zero() {
            return Err(ConfigError::invalid_value(
                "transactions",
                "interval",
                "must be greater than zero",
            ));
        }
        validate_schedule("transactions", "initial_delay", tx.initial_delay)?;
        validate_schedule("transactions", "interval", tx.interval)?;
        validate_type("transactions", &tx.usage_type)?;
    }

    let mut names = HashSet::new();
    for job in &config.counts {
        if !names.insert(job.name.as_str()) {
            return Err(ConfigError::DuplicateCountJob {
                name: job.name.clone(),
            });
        }
        if job.interval.is_zero() {
            return Err(ConfigError::invalid_value(
                "counts",
                "interval",
                format!("count job '{}' must have a non-zero interval", job.name),
            ));
        }
        validate_schedule("counts", "initial_delay", job.initial_delay)?;
        validate_schedule("counts", "interval", job.interval)?;
        validate_type("counts", &job.usage_type)?;
    }

    if config.meta.enabled {
        validate_schedule("meta", "delay", config.meta.delay)?;
    }

    let deployment = &config.deployment;
    if deployment.hour > 23 {
        return Err(ConfigError::invalid_value(
            "deployment",
            "hour",
            format!("{} is not in 0-23", deployment.hour),
        ));
    }
    if deployment.minute > 59 {
        return Err(ConfigError::invalid_value(
            "deployment",
            "minute",
            format!("{} is not in 0-59", deployment.minute),
        ));
    }

    Ok(())
}

fn validate_schedule(section: &'static str, field: &'static str, value: Duration) -> Result<()> {
    if value > MAX_SCHEDULE_DELAY {
        return Err(ConfigError::invalid_value(
            section,
            field,
            format!("{:?} exceeds the one-year limit", value),
        ));
    }
    Ok(())
}

fn validate_type(section: &'static str, usage_type: &str) -> Result<()> {
    if usage_type.is_empty() || usage_type.len() > MAX_TYPE_LEN {
        return Err(ConfigError::invalid_value(
            section,
            "type",
            format!("'{}' must be 1-{} characters", usage_type, MAX_TYPE_LEN),
        ));
    }
    Ok(())
}
