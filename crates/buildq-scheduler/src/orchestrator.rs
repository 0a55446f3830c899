//! Single-instance orchestrator run.
//!
//! One run takes the queue lock, recovers claims left behind by a crashed
//! instance, drains the queue and releases the lock. If another live process
//! holds the lock the run does nothing: that instance rescans the store and
//! will pick up anything enqueued since.

use buildq_config::SystemConfig;
use buildq_core::{BuildRunner, JobStore, Notifier};
use buildq_executor::{ScriptRunner, notifier_from_config};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::lock::{self, LockError, QueueLock};
use crate::queue::FsJobStore;
use crate::scheduler::{RunSummary, Scheduler, SchedulerSettings};

/// Errors that stop a run before the scheduler starts.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("job store: {0}")]
    Store(#[from] buildq_core::Error),
}

/// What a run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another live instance holds the lock.
    AlreadyRunning { holder: Option<u32> },
    /// The queue was drained.
    Drained(RunSummary),
}

pub struct Orchestrator {
    lock_path: PathBuf,
    store: Arc<dyn JobStore>,
    scheduler: Scheduler,
}

impl Orchestrator {
    pub fn new(
        lock_path: impl Into<PathBuf>,
        store: Arc<dyn JobStore>,
        runner: Arc<dyn BuildRunner>,
        notifier: Arc<dyn Notifier>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            lock_path: lock_path.into(),
            scheduler: Scheduler::new(store.clone(), runner, notifier, settings),
            store,
        }
    }

    /// Orchestrator over the filesystem store, script runner and notifier
    /// described by `config`.
    pub async fn from_config(config: &SystemConfig) -> Result<Self, RunError> {
        let store = FsJobStore::open(&config.queue_dir).await?;
        Ok(Self::new(
            &config.lock_file,
            Arc::new(store),
            Arc::new(ScriptRunner::from_config(config)),
            notifier_from_config(&config.notify),
            SchedulerSettings::from_config(config),
        ))
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    /// Drain the queue if no other instance is doing so.
    pub async fn run(&self) -> Result<RunOutcome, RunError> {
        let Some(lock) = QueueLock::acquire(&self.lock_path)? else {
            let holder = lock::holder(&self.lock_path).ok().flatten();
            info!(
                lock = %self.lock_path.display(),
                ?holder,
                "Another instance is processing the queue"
            );
            return Ok(RunOutcome::AlreadyRunning { holder });
        };

        let recovered = self.store.reset_stale().await?;
        if recovered > 0 {
            warn!(recovered, "Requeued jobs claimed by a previous instance");
        }

        let summary = self.scheduler.run().await;

        if let Err(e) = lock.release() {
            warn!(error = %e, "Failed to release queue lock");
        }
        Ok(RunOutcome::Drained(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use buildq_core::{JobDescriptor, JobState, Notification};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn notify(&self, notification: &Notification) -> buildq_core::Result<()> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    /// A queue directory, scripts directory and scratch root wired to the
    /// real script runner.
    struct Site {
        root: tempfile::TempDir,
        store: Arc<FsJobStore>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Site {
        async fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            std::fs::create_dir(root.path().join("scripts")).unwrap();
            std::fs::create_dir(root.path().join("scratch")).unwrap();
            let store = FsJobStore::open(root.path().join("queue")).await.unwrap();
            Self {
                root,
                store: Arc::new(store),
                notifier: Arc::new(RecordingNotifier::default()),
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.root.path().join(name)
        }

        fn lock_path(&self) -> PathBuf {
            self.store.dir().join("lock")
        }

        fn fragment(&self, name: &str, text: &str) {
            std::fs::write(self.path("scripts").join(name), text).unwrap();
        }

        fn orchestrator(&self) -> Orchestrator {
            let runner = ScriptRunner::new(self.path("scripts"), vec![self.path("scratch")]);
            Orchestrator::new(
                self.lock_path(),
                self.store.clone(),
                Arc::new(runner),
                self.notifier.clone(),
                SchedulerSettings {
                    workers: 2,
                    poll_interval: Duration::from_millis(20),
                    serialize_repositories: true,
                },
            )
        }

        async fn enqueue(&self, repository: &str) -> buildq_core::JobId {
            let job = JobDescriptor::new(repository, "refs/heads/main", "abc123", "A", "a@x.com");
            self.store.enqueue(&job).await.unwrap()
        }

        async fn remaining(&self) -> usize {
            self.store.list(JobState::Pending).await.unwrap().len()
                + self.store.list(JobState::Claimed).await.unwrap().len()
        }

        fn sent(&self) -> Vec<Notification> {
            self.notifier.sent.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_successful_build_end_to_end() {
        let site = Site::new().await;
        site.fragment("checkout_main", "exit 0\n");
        site.enqueue("amp_bootstrap").await;

        let outcome = site.orchestrator().run().await.unwrap();

        let RunOutcome::Drained(summary) = outcome else {
            panic!("expected a drained run, got {:?}", outcome);
        };
        assert_eq!(summary.succeeded, 1);
        assert_eq!(site.remaining().await, 0);
        assert!(site.sent().is_empty());
        assert!(!site.lock_path().exists());
    }

    #[tokio::test]
    async fn test_failed_build_end_to_end() {
        let site = Site::new().await;
        site.fragment("checkout_main", "echo \"error: disk full\"; exit 1\n");
        site.enqueue("amp_bootstrap").await;

        let outcome = site.orchestrator().run().await.unwrap();

        assert!(matches!(
            outcome,
            RunOutcome::Drained(RunSummary { failed: 1, .. })
        ));
        assert_eq!(site.remaining().await, 0);

        let sent = site.sent();
        assert_eq!(sent.len(), 1);
        let text = format!("{}\n{}", sent[0].subject, sent[0].body);
        assert!(text.contains("amp_bootstrap"));
        assert!(text.contains("abc123"));
        assert!(text.contains("error: disk full"));
    }

    #[tokio::test]
    async fn test_live_lock_holder_means_no_op() {
        let site = Site::new().await;
        site.enqueue("amp_bootstrap").await;
        std::fs::write(site.lock_path(), format!("{}\n", std::process::id())).unwrap();

        let outcome = site.orchestrator().run().await.unwrap();

        assert_eq!(
            outcome,
            RunOutcome::AlreadyRunning {
                holder: Some(std::process::id())
            }
        );
        assert_eq!(site.store.list(JobState::Pending).await.unwrap().len(), 1);
        assert!(site.lock_path().exists());
    }

    #[tokio::test]
    async fn test_crash_recovery_runs_claimed_job_once() {
        let site = Site::new().await;
        let counter = site.path("runs");
        site.fragment(
            "build_main",
            &format!("echo {{repository}} >> '{}'\n", counter.display()),
        );

        // Claimed by an instance that died, whose lock file was left behind.
        let id = site.enqueue("amp_mgms").await;
        assert!(site.store.claim(&id).await.unwrap());
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead = child.id();
        child.wait().unwrap();
        std::fs::write(site.lock_path(), format!("{}\n", dead)).unwrap();

        let outcome = site.orchestrator().run().await.unwrap();

        assert!(matches!(
            outcome,
            RunOutcome::Drained(RunSummary { succeeded: 1, .. })
        ));
        assert_eq!(std::fs::read_to_string(&counter).unwrap(), "amp_mgms\n");
        assert_eq!(site.remaining().await, 0);
    }

    #[tokio::test]
    async fn test_from_config() {
        let site = Site::new().await;
        let kdl = format!(
            "queue \"{}\"\nscripts \"{}\"\nscratch \"{}\"\nworkers 3\n",
            site.store.dir().display(),
            site.path("scripts").display(),
            site.path("scratch").display(),
        );
        let config = buildq_config::parse_system_config(&kdl).unwrap();

        let orchestrator = Orchestrator::from_config(&config).await.unwrap();

        assert_eq!(orchestrator.lock_path(), site.lock_path());
        assert_eq!(orchestrator.scheduler.settings().workers, 3);
        assert!(matches!(
            orchestrator.run().await.unwrap(),
            RunOutcome::Drained(RunSummary { succeeded: 0, .. })
        ));
    }
}
