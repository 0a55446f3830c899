//! Build execution backends for buildq.
//!
//! Provides:
//! - Build script assembly from phase fragments
//! - A local runner executing the assembled script in a scratch directory
//! - Notification sinks for failed builds

pub mod local;
pub mod notify;
pub mod script;

pub use buildq_core::executor::{BuildOutcome, BuildRunner};
pub use local::ScriptRunner;
pub use notify::{LogNotifier, SendmailNotifier, notifier_from_config};
pub use script::{BuildScript, Fragment, PHASES};
