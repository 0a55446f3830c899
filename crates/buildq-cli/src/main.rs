//! buildq CLI tool.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "buildq")]
#[command(about = "Queue-driven build orchestrator", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "BUILDQ_CONFIG", default_value = "buildq.kdl")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drain the queue, unless another instance is already doing so
    Run {
        /// Number of concurrent builds (overrides the configuration)
        #[arg(long)]
        workers: Option<usize>,
        /// Turn on debug logging
        #[arg(long)]
        debug: bool,
        /// Append logs to this file instead of stderr
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Queue a build
    Enqueue {
        /// Repository name
        repository: String,
        /// Git ref, e.g. refs/heads/main
        git_ref: String,
        /// Commit id
        commit_id: String,
        /// Committer name
        committer_name: String,
        /// Committer email
        committer_email: String,
    },
    /// Ask a running server to rebuild a repository
    Trigger {
        /// Repository to build
        repository: String,
        /// Git ref to build
        #[arg(long = "ref", default_value = "refs/heads/main")]
        git_ref: String,
        /// Webhook URL (defaults to the configured server)
        #[arg(long)]
        url: Option<String>,
        /// Name recorded as the committer
        #[arg(long, default_value = "Manual Trigger")]
        name: String,
        /// Address failure notifications are sent to (defaults to the
        /// configured notification sender)
        #[arg(long)]
        email: Option<String>,
    },
    /// Show the lock holder and queued jobs
    Status,
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file (defaults to --config)
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workers,
            debug,
            log_file,
        } => {
            init_tracing(debug, log_file.as_ref())?;
            commands::run::run(&cli.config, workers).await?;
        }
        Commands::Enqueue {
            repository,
            git_ref,
            commit_id,
            committer_name,
            committer_email,
        } => {
            init_tracing(false, None)?;
            commands::queue::enqueue(
                &cli.config,
                &repository,
                &git_ref,
                &commit_id,
                &committer_name,
                &committer_email,
            )
            .await?;
        }
        Commands::Trigger {
            repository,
            git_ref,
            url,
            name,
            email,
        } => {
            init_tracing(false, None)?;
            commands::trigger::trigger(&cli.config, &repository, &git_ref, url, &name, email)
                .await?;
        }
        Commands::Status => {
            commands::queue::status(&cli.config).await?;
        }
        Commands::Validate { path } => {
            commands::validate(path.as_ref().unwrap_or(&cli.config))?;
        }
    }

    Ok(())
}

fn init_tracing(debug: bool, log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_enqueue() {
        let cli = Cli::try_parse_from([
            "buildq",
            "--config",
            "/etc/buildq.kdl",
            "enqueue",
            "amp_mgms",
            "refs/heads/main",
            "abc123",
            "A",
            "a@x.com",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/buildq.kdl"));
        assert!(matches!(
            cli.command,
            Commands::Enqueue { ref repository, ref commit_id, .. }
                if repository == "amp_mgms" && commit_id == "abc123"
        ));
    }

    #[test]
    fn test_parse_trigger_defaults() {
        let cli = Cli::try_parse_from(["buildq", "trigger", "amp_bootstrap"]).unwrap();
        let Commands::Trigger {
            git_ref,
            url,
            name,
            email,
            ..
        } = cli.command
        else {
            panic!("expected trigger");
        };
        assert_eq!(git_ref, "refs/heads/main");
        assert!(url.is_none());
        assert!(email.is_none());
        assert_eq!(name, "Manual Trigger");
    }
}
