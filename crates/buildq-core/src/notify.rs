//! Build failure notifications.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{BuildOutcome, JobDescriptor, Result};

/// A message addressed to the person responsible for a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub to_name: String,
    pub to_email: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    /// Compose the failure notice for a job whose build failed.
    pub fn build_failed(job: &JobDescriptor, outcome: &BuildOutcome) -> Self {
        let body = format!(
            "Hello {name},\n\
             \n\
             The build for {repo} commit {commit} in the branch {git_ref} has failed.\n\
             \n\
             The script returned an exit code of {code} and produced the following output:\n\
             ----------------------------------\n\
             {output}\n\
             ----------------------------------\n\
             \n\
             Fragments run: {fragments}\n\
             Elapsed: {elapsed:.1}s\n",
            name = job.committer_name,
            repo = job.repository,
            commit = job.commit_id,
            git_ref = job.git_ref,
            code = outcome.exit_code_display(),
            output = outcome.output.trim_end(),
            fragments = outcome.fragments.join(", "),
            elapsed = outcome.elapsed.as_secs_f64(),
        );

        Self {
            to_name: job.committer_name.clone(),
            to_email: job.committer_email.clone(),
            subject: format!("Build failed for {}/{}", job.repository, job.commit_id),
            body,
        }
    }
}

/// Trait for notification sinks.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Name of this notifier.
    fn name(&self) -> &'static str;

    /// Deliver a notification.
    async fn notify(&self, notification: &Notification) -> Result<()>;
}
