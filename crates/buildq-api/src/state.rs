//! Application state.

use buildq_config::SystemConfig;
use buildq_core::JobStore;
use std::sync::Arc;

use crate::services::Autorun;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SystemConfig>,
    pub store: Arc<dyn JobStore>,
    /// Wakes the in-process orchestrator after jobs are queued.
    pub autorun: Option<Autorun>,
}

impl AppState {
    pub fn new(config: SystemConfig, store: Arc<dyn JobStore>, autorun: Option<Autorun>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            autorun,
        }
    }
}
