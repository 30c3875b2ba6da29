//! Serve command - Run the usage reporter
//!
//! Schedules the configured jobs and reports until SIGINT or SIGTERM, then
//! stops every job, which sends a final transaction window.
//!
//! The standalone daemon has no count sources, so `[[counts]]` jobs are
//! skipped here; they only run when the service is embedded in a host that
//! registers them.

use anyhow::{Context, Result};
use tally_config::Config;
use tally_telemetry::UsageService;
use tokio::signal;
use tracing::{info, warn};

/// Run the reporter until a shutdown signal arrives
pub async fn run(mut config: Config) -> Result<()> {
    for job in config.counts.drain(..) {
        warn!(job = %job.name, "no count source in standalone mode, skipping job");
    }

    let service = UsageService::from_config(config).context("failed to build usage service")?;

    let started = service.start().context("failed to start usage collection")?;
    info!(
        node_id = %service.identity().node_id(),
        product = %service.identity().product(),
        started,
        "tally running"
    );

    wait_for_shutdown().await;

    info!("shutdown signal received, stopping jobs...");
    service.shutdown().await;
    info!("tally shutdown complete");

    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
