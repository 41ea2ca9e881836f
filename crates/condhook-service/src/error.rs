//! Error types for the service crate.

use condhook_rules::RuleError;

pub use condhook_core::error::Error as CondhookError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Rule(#[from] RuleError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl From<rumqttc::ClientError> for ServiceError {
    fn from(e: rumqttc::ClientError) -> Self {
        ServiceError::Mqtt(e.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        ServiceError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::Serialization(e.to_string())
    }
}

impl From<CondhookError> for ServiceError {
    fn from(e: CondhookError) -> Self {
        match e {
            CondhookError::Config(s) => ServiceError::Config(s),
            CondhookError::Serialization(s) => ServiceError::Serialization(s),
            other => ServiceError::Config(other.to_string()),
        }
    }
}
