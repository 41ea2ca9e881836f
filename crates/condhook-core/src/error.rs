//! Unified error handling for condhook.
//!
//! Each crate keeps its own error enum and converts into this one at the
//! boundary, so the binary only has to deal with a single type.

/// Unified error type for condhook.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rule compilation or evaluation errors.
    #[error("Rule error: {0}")]
    Rule(String),

    /// Device session errors.
    #[error("Device error: {0}")]
    Device(String),

    /// Message bus errors.
    #[error("Bus error: {0}")]
    Bus(String),

    /// Network-related errors.
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout errors.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Parse errors with location context.
    #[error("Parse error at {location}: {message}")]
    Parse { location: String, message: String },

    /// Generic internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

/// Convenience macros for creating errors.
#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! rule_err {
    ($msg:expr) => {
        $crate::error::Error::Rule($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Rule(format!($fmt, $($arg)*))
    };
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}
