//! Error types for the rules crate.

use crate::expression::ExpressionError;
use crate::forward::ForwardError;

// Re-export the core error type
pub use condhook_core::error::Error as CondhookError;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// A condition or value expression was rejected at link/config time.
    #[error("invalid {field} expression: {message}")]
    Compile {
        field: &'static str,
        message: String,
    },

    /// An inbound payload is not a number.
    #[error("payload parse error: {0}")]
    Payload(String),

    #[error("evaluation error: {0}")]
    Evaluation(#[from] ExpressionError),

    #[error("forwarding error: {0}")]
    Forwarding(#[from] ForwardError),

    /// The device control (subscribe/publish) failed.
    #[error("control error: {0}")]
    Control(String),

    #[error("session mailbox is full")]
    MailboxFull,

    #[error("session is closed")]
    SessionClosed,
}

/// Result type for rule operations
pub type Result<T> = std::result::Result<T, RuleError>;

impl From<RuleError> for CondhookError {
    fn from(e: RuleError) -> Self {
        match e {
            RuleError::Compile { field, message } => CondhookError::Parse {
                location: field.to_string(),
                message,
            },
            RuleError::Payload(s) => CondhookError::Parse {
                location: "payload".to_string(),
                message: s,
            },
            RuleError::Evaluation(e) => CondhookError::Rule(e.to_string()),
            RuleError::Forwarding(e) => CondhookError::Network(e.to_string()),
            RuleError::Control(s) => CondhookError::Bus(s),
            RuleError::MailboxFull | RuleError::SessionClosed => {
                CondhookError::Device(e.to_string())
            }
        }
    }
}
