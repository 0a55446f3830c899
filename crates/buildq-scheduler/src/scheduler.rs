//! Execution scheduler.
//!
//! Drains the job store through a bounded pool of build tasks. Each pass of
//! the control loop resolves finished builds, then claims and dispatches
//! everything pending. The loop returns once nothing is running or waiting.

use buildq_config::SystemConfig;
use buildq_core::{
    BuildOutcome, BuildRunner, Error, JobDescriptor, JobId, JobState, JobStore, Notification,
    Notifier,
};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// Tuning for one scheduler run.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Maximum number of concurrent builds.
    pub workers: usize,
    /// How long to wait for a completion before rescanning the store.
    pub poll_interval: Duration,
    /// Never run two builds of the same repository at once.
    pub serialize_repositories: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            poll_interval: Duration::from_secs(10),
            serialize_repositories: true,
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            workers: config.workers,
            poll_interval: config.poll_interval,
            serialize_repositories: config.serialize_repositories,
        }
    }
}

/// Counts of how the jobs of one run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Entries that could not be parsed and were deleted unrun.
    pub discarded: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.discarded
    }
}

type Finished = (JobId, JobDescriptor, Result<buildq_core::Result<BuildOutcome>, JoinError>);

/// Bookkeeping for the jobs of one run.
struct RunState {
    permits: Arc<Semaphore>,
    running: FuturesUnordered<BoxFuture<'static, Finished>>,
    busy: HashSet<String>,
    deferred: VecDeque<(JobId, JobDescriptor)>,
    summary: RunSummary,
}

impl RunState {
    fn is_idle(&self) -> bool {
        self.running.is_empty() && self.deferred.is_empty()
    }
}

/// Claims jobs from a store and runs them to completion.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    runner: Arc<dyn BuildRunner>,
    notifier: Arc<dyn Notifier>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        runner: Arc<dyn BuildRunner>,
        notifier: Arc<dyn Notifier>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            runner,
            notifier,
            settings,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Run until the store has no pending jobs and every build has finished.
    pub async fn run(&self) -> RunSummary {
        let mut state = RunState {
            permits: Arc::new(Semaphore::new(self.settings.workers.max(1))),
            running: FuturesUnordered::new(),
            busy: HashSet::new(),
            deferred: VecDeque::new(),
            summary: RunSummary::default(),
        };

        info!(
            workers = self.settings.workers,
            runner = self.runner.name(),
            notifier = self.notifier.name(),
            "Scheduler started"
        );

        loop {
            while let Some(Some(finished)) = state.running.next().now_or_never() {
                self.resolve(&mut state, finished).await;
            }

            self.scan(&mut state).await;

            if state.is_idle() {
                break;
            }

            let poll = tokio::time::sleep(self.settings.poll_interval);
            let finished = if state.running.is_empty() {
                poll.await;
                None
            } else {
                tokio::select! {
                    finished = state.running.next() => finished,
                    _ = poll => None,
                }
            };
            if let Some(finished) = finished {
                self.resolve(&mut state, finished).await;
            }
        }

        let summary = state.summary;
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            discarded = summary.discarded,
            "Queue drained"
        );
        summary
    }

    /// Claim every pending job and dispatch or defer it.
    async fn scan(&self, state: &mut RunState) {
        let pending = match self.store.list(JobState::Pending).await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to list pending jobs");
                return;
            }
        };

        for id in pending {
            match self.store.claim(&id).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(job_id = %id, error = %e, "Failed to claim job");
                    continue;
                }
            }

            let job = match self.store.load(&id).await {
                Ok(job) => job,
                Err(Error::InvalidInput(reason)) => {
                    warn!(job_id = %id, %reason, "Discarding malformed job");
                    self.discard(state, &id).await;
                    continue;
                }
                Err(e) => {
                    error!(job_id = %id, error = %e, "Failed to read claimed job, discarding");
                    self.discard(state, &id).await;
                    continue;
                }
            };

            if self.settings.serialize_repositories && state.busy.contains(&job.repository) {
                info!(
                    job_id = %id,
                    repository = %job.repository,
                    "Repository busy, deferring build"
                );
                state.deferred.push_back((id, job));
            } else {
                self.dispatch(state, id, job);
            }
        }
    }

    async fn discard(&self, state: &mut RunState, id: &JobId) {
        if let Err(e) = self.store.remove(id).await {
            error!(job_id = %id, error = %e, "Failed to remove discarded job");
        }
        state.summary.discarded += 1;
    }

    fn dispatch(&self, state: &mut RunState, id: JobId, job: JobDescriptor) {
        info!(
            job_id = %id,
            repository = %job.repository,
            git_ref = %job.git_ref,
            commit = %job.commit_id,
            "Dispatching build"
        );

        if self.settings.serialize_repositories {
            state.busy.insert(job.repository.clone());
        }

        let runner = self.runner.clone();
        let permits = state.permits.clone();
        let task_job = job.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| Error::Internal(format!("worker pool closed: {}", e)))?;
            runner.execute(&task_job).await
        });

        state
            .running
            .push(async move { (id, job, handle.await) }.boxed());
    }

    async fn resolve(&self, state: &mut RunState, (id, job, joined): Finished) {
        match joined {
            Ok(Ok(outcome)) if outcome.is_success() => {
                info!(
                    job_id = %id,
                    repository = %job.repository,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    noop = outcome.is_noop(),
                    "Build succeeded"
                );
                state.summary.succeeded += 1;
            }
            Ok(Ok(outcome)) => {
                warn!(
                    job_id = %id,
                    repository = %job.repository,
                    commit = %job.commit_id,
                    exit_code = %outcome.exit_code_display(),
                    "Build failed"
                );
                state.summary.failed += 1;
                let notification = Notification::build_failed(&job, &outcome);
                if let Err(e) = self.notifier.notify(&notification).await {
                    error!(job_id = %id, error = %e, "Failed to send failure notification");
                }
            }
            Ok(Err(e)) => {
                error!(
                    job_id = %id,
                    repository = %job.repository,
                    error = %e,
                    "Build could not be run"
                );
                state.summary.failed += 1;
            }
            Err(e) => {
                error!(
                    job_id = %id,
                    repository = %job.repository,
                    error = %e,
                    "Build task panicked"
                );
                state.summary.failed += 1;
            }
        }

        if let Err(e) = self.store.remove(&id).await {
            error!(job_id = %id, error = %e, "Failed to remove finished job");
        }

        if self.settings.serialize_repositories {
            state.busy.remove(&job.repository);
            let next = state
                .deferred
                .iter()
                .position(|(_, deferred)| deferred.repository == job.repository);
            if let Some((id, job)) = next.and_then(|i| state.deferred.remove(i)) {
                debug!(job_id = %id, repository = %job.repository, "Resuming deferred build");
                self.dispatch(state, id, job);
            }
        }
    }
}
