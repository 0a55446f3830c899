//! Webhook trigger server for buildq.
//!
//! Turns push notifications from a Git provider, and manual rebuild
//! requests, into queued build jobs.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
