//! Build script assembly.
//!
//! A build script is stitched together from fragment files named
//! `<phase>_<branch>` in the scripts directory. Phases are probed in a fixed
//! order and missing fragments are skipped.

use buildq_config::TemplateVars;
use buildq_core::{JobDescriptor, Result};
use std::path::Path;
use tracing::debug;

/// Build phases in execution order.
pub const PHASES: [&str; 3] = ["checkout", "build", "distribute"];

/// Name of the assembled script inside the scratch directory.
pub const SCRIPT_NAME: &str = "build.sh";

/// A fragment file's name and raw template text.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub name: String,
    pub text: String,
}

impl Fragment {
    /// Fragment file name for a phase and normalized branch.
    pub fn file_name(phase: &str, branch: &str) -> String {
        format!("{}_{}", phase, branch)
    }

    /// Load the fragments that apply to a job, in phase order.
    pub async fn discover(scripts_dir: &Path, job: &JobDescriptor) -> Result<Vec<Fragment>> {
        let branch = job.branch();
        let mut fragments = Vec::new();

        for phase in PHASES {
            let name = Self::file_name(phase, &branch);
            let path = scripts_dir.join(&name);

            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {
                    let text = tokio::fs::read_to_string(&path).await?;
                    debug!(fragment = %name, "Found build fragment");
                    fragments.push(Fragment { name, text });
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(fragments)
    }
}

/// An assembled, substituted build script.
#[derive(Debug, Clone)]
pub struct BuildScript {
    fragments: Vec<String>,
    text: String,
}

impl BuildScript {
    /// Concatenate fragments into one strict-mode shell script.
    ///
    /// Stderr is redirected into stdout at the top of the script so the
    /// captured output keeps its interleaving.
    pub fn assemble(fragments: &[Fragment], vars: &TemplateVars) -> Self {
        let mut text = String::from("#!/bin/bash\nexec 2>&1\nset -ex\necho Starting at $(date)\n");

        for fragment in fragments {
            text.push_str(&format!("### Start of {} ###\n", fragment.name));
            text.push_str(&vars.interpolate(&fragment.text));
            if !fragment.text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("### End of {} ###\n", fragment.name));
        }

        text.push_str("echo Successful at $(date)\n");

        Self {
            fragments: fragments.iter().map(|f| f.name.clone()).collect(),
            text,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fragment_names(&self) -> &[String] {
        &self.fragments
    }
}
