//! KDL configuration parsing for buildq.
//!
//! This crate handles parsing of:
//! - System configuration (buildq.kdl)
//! - Template substitution for build script fragments

pub mod error;
pub mod system;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use system::{NotifyConfig, ServerConfig, SystemConfig, load_system_config, parse_system_config};
pub use variables::TemplateVars;
