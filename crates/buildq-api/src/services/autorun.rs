//! In-process orchestrator runs triggered by webhooks.
//!
//! Wake-ups are coalesced into a channel of capacity one and processed by a
//! single task, so runs never overlap inside the server. A wake-up that
//! arrives during a run is kept and causes one more run afterwards, which
//! picks up any job enqueued after the previous run's last scan.

use buildq_scheduler::{Orchestrator, RunOutcome};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Handle used to wake the background orchestrator.
#[derive(Clone)]
pub struct Autorun {
    tx: mpsc::Sender<()>,
}

impl Autorun {
    /// Start the background task.
    pub fn spawn(orchestrator: Arc<Orchestrator>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(run_loop(orchestrator, rx));
        (Self { tx }, handle)
    }

    /// Request a run. Never blocks.
    pub fn kick(&self) {
        match self.tx.try_send(()) {
            Ok(()) => debug!("Scheduled orchestrator run"),
            Err(TrySendError::Full(())) => debug!("Orchestrator run already scheduled"),
            Err(TrySendError::Closed(())) => error!("Autorun task is gone, job left queued"),
        }
    }
}

async fn run_loop(orchestrator: Arc<Orchestrator>, mut rx: mpsc::Receiver<()>) {
    while rx.recv().await.is_some() {
        match orchestrator.run().await {
            Ok(RunOutcome::Drained(summary)) => info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                discarded = summary.discarded,
                "Autorun finished"
            ),
            Ok(RunOutcome::AlreadyRunning { holder }) => {
                info!(?holder, "Queue is being processed by another instance")
            }
            Err(e) => error!(error = %e, "Autorun failed"),
        }
    }
    debug!("Autorun task stopped");
}
