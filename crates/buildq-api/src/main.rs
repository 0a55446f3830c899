//! buildq webhook server

use anyhow::Context;
use buildq_api::services::Autorun;
use buildq_api::{AppState, routes};
use buildq_config::load_system_config;
use buildq_scheduler::{FsJobStore, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BUILDQ_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("buildq.kdl"));
    let config = load_system_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    info!(config = %config_path.display(), "Loaded configuration");

    let store = Arc::new(
        FsJobStore::open(&config.queue_dir)
            .await
            .with_context(|| format!("Failed to open queue {}", config.queue_dir.display()))?,
    );

    let autorun = if config.server.autorun {
        let orchestrator = Orchestrator::from_config(&config).await?;
        let (autorun, _handle) = Autorun::spawn(Arc::new(orchestrator));
        // Pick up anything queued while the server was down.
        autorun.kick();
        Some(autorun)
    } else {
        info!("Autorun disabled, builds run only via `buildq run`");
        None
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, store, autorun);

    let app = routes::router(state).layer(TraceLayer::new_for_http());

    info!("Starting server on {}", addr);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
