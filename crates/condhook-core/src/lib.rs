//! Core types for condhook.
//!
//! Shared error type and configuration defaults used by the rules engine,
//! the service glue and the command-line binary.

pub mod config;
pub mod error;

pub use config::ServiceConfig;
pub use error::{Error, Result};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{defaults, env_vars, normalize_framework_server, ServiceConfig};
    pub use crate::error::{Error, Result};
}
