//! Local script runner.
//!
//! Runs the assembled build script on this host inside a private scratch
//! directory that is removed when the build ends, whatever the outcome.

use async_trait::async_trait;
use buildq_config::{SystemConfig, TemplateVars};
use buildq_core::executor::{BuildOutcome, BuildRunner};
use buildq_core::{Error, JobDescriptor, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::script::{BuildScript, Fragment, SCRIPT_NAME};

/// Interpreter used to run build scripts.
pub const DEFAULT_SHELL: &str = "bash";

/// Runs build scripts as local subprocesses.
pub struct ScriptRunner {
    scripts_dir: PathBuf,
    scratch_roots: Vec<PathBuf>,
    shell: String,
}

impl ScriptRunner {
    pub fn new(scripts_dir: impl Into<PathBuf>, scratch_roots: Vec<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            scratch_roots,
            shell: DEFAULT_SHELL.to_string(),
        }
    }

    pub fn from_config(config: &SystemConfig) -> Self {
        Self::new(config.scripts_dir.clone(), config.scratch_roots.clone())
    }

    /// Use a different interpreter for the assembled script.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// First configured scratch root that exists, else the system temp dir.
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_roots
            .iter()
            .find(|p| p.is_dir())
            .cloned()
            .unwrap_or_else(std::env::temp_dir)
    }

    async fn run_script(
        &self,
        script: &BuildScript,
        root: &Path,
        workdir: &Path,
    ) -> Result<BuildOutcome> {
        let script_path = workdir.join(SCRIPT_NAME);
        tokio::fs::write(&script_path, script.text()).await?;
        tokio::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o775)).await?;

        let start = Instant::now();
        let output = Command::new(&self.shell)
            .arg(&script_path)
            .current_dir(workdir)
            .env("TMPDIR", root)
            .env("TMP", root)
            .env("TEMP", root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::ExecutionFailed(format!("failed to start {}: {}", self.shell, e))
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            text.push_str(&String::from_utf8_lossy(&output.stderr));
        }

        Ok(BuildOutcome {
            exit_code: output.status.code(),
            output: text,
            elapsed: start.elapsed(),
            fragments: script.fragment_names().to_vec(),
        })
    }
}

#[async_trait]
impl BuildRunner for ScriptRunner {
    fn name(&self) -> &'static str {
        "script"
    }

    async fn execute(&self, job: &JobDescriptor) -> Result<BuildOutcome> {
        let fragments = Fragment::discover(&self.scripts_dir, job).await?;
        if fragments.is_empty() {
            info!(
                repository = %job.repository,
                branch = %job.branch(),
                "No build fragments for branch, nothing to do"
            );
            return Ok(BuildOutcome::noop());
        }

        let script = BuildScript::assemble(&fragments, &TemplateVars::from_job(job));
        debug!(repository = %job.repository, script = %script.text(), "Assembled build script");

        let root = self.scratch_root();
        let workdir = tempfile::Builder::new()
            .prefix("buildq-")
            .tempdir_in(&root)?;

        info!(
            repository = %job.repository,
            git_ref = %job.git_ref,
            commit = %job.commit_id,
            workdir = %workdir.path().display(),
            "Starting build"
        );

        let result = self.run_script(&script, &root, workdir.path()).await;

        let workdir_path = workdir.path().to_path_buf();
        if let Err(e) = workdir.close() {
            warn!(
                workdir = %workdir_path.display(),
                error = %e,
                "Failed to remove scratch directory"
            );
        }

        let outcome = result?;
        debug!(
            repository = %job.repository,
            exit_code = ?outcome.exit_code,
            output = %outcome.output,
            "Build finished"
        );
        Ok(outcome)
    }
}
