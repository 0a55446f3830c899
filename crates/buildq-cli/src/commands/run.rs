//! Orchestrator run command.

use anyhow::{Context, Result, bail};
use buildq_config::load_system_config;
use buildq_scheduler::{Orchestrator, RunOutcome};
use std::path::Path;
use tracing::{info, warn};

/// Drain the queue once.
///
/// Exits successfully without doing anything when another live instance
/// holds the queue lock.
pub async fn run(config_path: &Path, workers: Option<usize>) -> Result<()> {
    let mut config = load_system_config(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    if let Some(workers) = workers {
        if workers == 0 {
            bail!("--workers must be at least 1");
        }
        config.workers = workers;
    }

    let orchestrator = Orchestrator::from_config(&config)
        .await
        .context("Failed to set up orchestrator")?;

    // Dropping the run on a signal releases the lock and kills running builds;
    // their claims are reset by the next run.
    let outcome = tokio::select! {
        outcome = orchestrator.run() => outcome?,
        _ = shutdown_signal() => {
            warn!("Interrupted, unfinished builds will be retried by the next run");
            bail!("interrupted");
        }
    };

    match outcome {
        RunOutcome::AlreadyRunning { holder } => {
            info!(?holder, "Queue is already being processed, nothing to do");
        }
        RunOutcome::Drained(summary) => {
            info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                discarded = summary.discarded,
                "Run complete"
            );
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate => {},
    }
}
