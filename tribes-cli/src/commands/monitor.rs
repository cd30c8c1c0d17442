//! Monitor command - run the deadlock monitor in the foreground

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tribes_db::{monitor_deadlocks, StoreConfig, TxContext};

#[derive(Parser, Debug)]
pub struct MonitorArgs {
    /// Probe interval in seconds (overrides config)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: Option<u64>,

    /// Stop after this many seconds instead of running until interrupted
    #[arg(long)]
    pub duration: Option<u64>,
}

pub async fn run_monitor(config: &StoreConfig, args: MonitorArgs) -> Result<()> {
    let manager = super::connect(config)?;
    let interval = args
        .interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.monitor_interval());

    let (ctx, cancel) = TxContext::background().with_cancel();
    let ctx = match args.duration {
        Some(secs) => ctx.with_timeout(Duration::from_secs(secs)),
        None => ctx,
    };

    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    let reason = monitor_deadlocks(manager.backend(), &ctx, interval).await;
    info!(reason = %reason, "Monitor exited");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping monitor");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping monitor");
        }
    }
}
