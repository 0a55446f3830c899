//! Job store trait.
//!
//! A job store holds queued jobs in one of two states. A `Pending` entry is
//! visible to schedulers; a `Claimed` entry is owned by exactly one in-flight
//! execution. Claiming is the only ownership primitive, so it must be atomic
//! in every backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{JobDescriptor, JobId, Result};

/// Suffix appended to a pending entry's name when it is claimed.
pub const CLAIMED_SUFFIX: &str = ".lock";

/// State of a job store entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Claimed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Claimed => write!(f, "claimed"),
        }
    }
}

/// Trait for job stores.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new pending job. Never overwrites an existing entry.
    async fn enqueue(&self, job: &JobDescriptor) -> Result<JobId>;

    /// Revert every claimed entry to pending, returning how many were reverted.
    ///
    /// Only safe while holding the process lock: any claim found must belong
    /// to a previous, now dead, instance.
    async fn reset_stale(&self) -> Result<usize>;

    /// Snapshot of the entries in a state, in lexicographic order.
    ///
    /// Entries may be claimed or removed by the time the caller acts on them.
    async fn list(&self, state: JobState) -> Result<Vec<JobId>>;

    /// Atomically move a pending entry to claimed.
    ///
    /// Returns `false` if the pending entry no longer exists, meaning another
    /// caller claimed it first.
    async fn claim(&self, id: &JobId) -> Result<bool>;

    /// Read the descriptor of a claimed entry.
    async fn load(&self, id: &JobId) -> Result<JobDescriptor>;

    /// Delete a claimed entry. Removing an entry that is already gone succeeds.
    async fn remove(&self, id: &JobId) -> Result<()>;
}
