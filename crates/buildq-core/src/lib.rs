//! Core domain types and traits for the buildq build orchestrator.
//!
//! This crate contains:
//! - Job identifiers and job descriptors
//! - The job store trait (pending/claimed queue entries)
//! - The build runner trait and build outcomes
//! - Trigger events received from Git providers
//! - Failure notifications

pub mod error;
pub mod event;
pub mod executor;
pub mod id;
pub mod job;
pub mod notify;
pub mod queue;

pub use error::{Error, Result};
pub use executor::{BuildOutcome, BuildRunner};
pub use id::JobId;
pub use job::{JobDescriptor, normalize_ref};
pub use notify::{Notification, Notifier};
pub use queue::{JobState, JobStore};
