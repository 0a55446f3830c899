//! Build runner trait and build outcomes.
//!
//! Runners execute the build for one job descriptor in an isolated
//! environment and report what happened.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{JobDescriptor, Result};

/// Result of executing one build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutcome {
    /// Exit code of the build script. `None` if it was killed by a signal.
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr.
    pub output: String,
    /// Wall-clock time spent executing.
    pub elapsed: Duration,
    /// Names of the fragments that made up the script, in execution order.
    pub fragments: Vec<String>,
}

impl BuildOutcome {
    /// Outcome for a job with no applicable fragments.
    pub fn noop() -> Self {
        Self {
            exit_code: Some(0),
            output: String::new(),
            elapsed: Duration::ZERO,
            fragments: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn is_noop(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Exit code rendered for humans.
    pub fn exit_code_display(&self) -> String {
        match self.exit_code {
            Some(code) => code.to_string(),
            None => "killed by signal".to_string(),
        }
    }
}

/// Trait for build runners.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    /// Name of this runner.
    fn name(&self) -> &'static str;

    /// Run the build for a job to completion.
    ///
    /// A build script exiting nonzero is reported through
    /// [`BuildOutcome::exit_code`], not as an error. Errors mean the build
    /// could not be run at all.
    async fn execute(&self, job: &JobDescriptor) -> Result<BuildOutcome>;
}
