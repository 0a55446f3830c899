//! CLI command implementations.

pub mod queue;
pub mod run;
pub mod trigger;

use anyhow::{Context, Result};
use buildq_config::{TemplateVars, load_system_config};
use buildq_core::JobDescriptor;
use std::path::Path;

pub fn validate(path: &Path) -> Result<()> {
    let config = load_system_config(path)
        .with_context(|| format!("Configuration error in {}", path.display()))?;

    println!("Configuration is valid");
    println!("  queue:        {}", config.queue_dir.display());
    println!("  lock file:    {}", config.lock_file.display());
    println!("  scripts:      {}", config.scripts_dir.display());
    println!("  workers:      {}", config.workers);
    println!("  repositories: {}", config.repositories.join(", "));
    if let Some(bootstrap) = &config.bootstrap_repository {
        println!("  bootstrap:    {}", bootstrap);
    }

    for (fragment, names) in unresolved_placeholders(&config.scripts_dir)? {
        println!(
            "warning: {} uses unknown placeholders: {}",
            fragment,
            names.join(", ")
        );
    }
    Ok(())
}

/// Fragments in `scripts_dir` with placeholders no job can fill, by file name.
fn unresolved_placeholders(scripts_dir: &Path) -> Result<Vec<(String, Vec<String>)>> {
    let vars = TemplateVars::from_job(&JobDescriptor::new("", "", "", "", ""));
    let entries = std::fs::read_dir(scripts_dir)
        .with_context(|| format!("Failed to read scripts directory {}", scripts_dir.display()))?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let names = vars.unresolved(&text);
        if !names.is_empty() {
            found.push((entry.file_name().to_string_lossy().into_owned(), names));
        }
    }
    found.sort();
    Ok(found)
}
