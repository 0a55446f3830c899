//! Job scheduling for buildq.
//!
//! A single orchestrator instance per queue directory is guaranteed by a PID
//! lock file. While holding it, the orchestrator recovers claims left by a
//! crashed predecessor and runs the scheduler until the queue is drained.

pub mod lock;
pub mod orchestrator;
pub mod queue;
pub mod scheduler;

pub use lock::{LockError, QueueLock};
pub use orchestrator::{Orchestrator, RunError, RunOutcome};
pub use queue::FsJobStore;
pub use scheduler::{RunSummary, Scheduler, SchedulerSettings};
