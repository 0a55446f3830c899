//! Queue commands.

use anyhow::{Context, Result};
use buildq_config::load_system_config;
use buildq_core::{JobDescriptor, JobState, JobStore};
use buildq_scheduler::FsJobStore;
use buildq_scheduler::lock::{self, LockError, is_pid_alive};
use std::io::ErrorKind;
use std::path::Path;

/// Queue a build without going through the webhook server.
pub async fn enqueue(
    config_path: &Path,
    repository: &str,
    git_ref: &str,
    commit_id: &str,
    committer_name: &str,
    committer_email: &str,
) -> Result<()> {
    let config = load_system_config(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let store = FsJobStore::open(&config.queue_dir)
        .await
        .with_context(|| format!("Failed to open queue {}", config.queue_dir.display()))?;

    let job = JobDescriptor::new(
        repository,
        git_ref,
        commit_id,
        committer_name,
        committer_email,
    );
    let id = store.enqueue(&job).await.context("Failed to queue build")?;

    println!("{}", id);
    Ok(())
}

/// Print who holds the queue lock and what is queued.
pub async fn status(config_path: &Path) -> Result<()> {
    let config = load_system_config(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    match lock::holder(&config.lock_file) {
        Ok(Some(pid)) if is_pid_alive(pid) => println!("Orchestrator: running (pid {})", pid),
        Ok(Some(pid)) => println!("Orchestrator: stale lock (pid {} is gone)", pid),
        Ok(None) => println!("Orchestrator: unreadable lock file"),
        Err(LockError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
            println!("Orchestrator: idle")
        }
        Err(e) => return Err(e.into()),
    }

    let store = FsJobStore::open(&config.queue_dir)
        .await
        .with_context(|| format!("Failed to open queue {}", config.queue_dir.display()))?;
    for state in [JobState::Claimed, JobState::Pending] {
        let ids = store.list(state).await?;
        println!("{} ({}):", state, ids.len());
        for id in ids {
            println!("  {}", id);
        }
    }
    Ok(())
}
