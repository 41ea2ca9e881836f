//! Configuration defaults and helpers.
//!
//! Every default and environment variable name used across the workspace
//! lives here so the CLI, the service glue and the tests agree on them.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default values.
pub mod defaults {
    pub const FRAMEWORK_SERVER: &str = "http://localhost:7000";
    pub const MQTT_SERVER: &str = "tls://localhost:1883";
    /// debug=5, info=4, warning=3, error=2, fatal=1, panic=0
    pub const LOG_LEVEL: u8 = 4;
    pub const HTTP_TIMEOUT_SECS: u64 = 10;
    /// Per-session mailbox size.
    pub const MAILBOX_CAPACITY: usize = 256;
    pub const MQTT_KEEP_ALIVE_SECS: u64 = 60;
    /// Capacity of the rumqttc request channel.
    pub const MQTT_CHANNEL_CAPACITY: usize = 64;
}

/// Environment variable names.
pub mod env_vars {
    pub const FRAMEWORK_SERVER: &str = "FRAMEWORK_SERVER";
    pub const MQTT_SERVER: &str = "MQTT_SERVER";
    pub const SERVICE_ID: &str = "SERVICE_ID";
    pub const SERVICE_TOKEN: &str = "SERVICE_TOKEN";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const HTTP_TIMEOUT_SECS: &str = "HTTP_TIMEOUT_SECS";
    pub const LOG_JSON: &str = "CONDHOOK_LOG_JSON";
}

/// Runtime configuration of the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Framework REST server URI.
    #[serde(default = "default_framework_server")]
    pub framework_server: String,

    /// MQTT server URI (`scheme://host:port`, scheme `tcp` or `tls`).
    #[serde(default = "default_mqtt_server")]
    pub mqtt_server: String,

    /// Service id, also the MQTT username.
    pub service_id: String,

    /// Service token, also the MQTT password.
    pub service_token: String,

    /// Timeout for outbound HTTP POSTs.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Mailbox capacity of each device session.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

fn default_framework_server() -> String {
    defaults::FRAMEWORK_SERVER.to_string()
}

fn default_mqtt_server() -> String {
    defaults::MQTT_SERVER.to_string()
}

fn default_http_timeout() -> u64 {
    defaults::HTTP_TIMEOUT_SECS
}

fn default_mailbox_capacity() -> usize {
    defaults::MAILBOX_CAPACITY
}

impl ServiceConfig {
    /// Create a configuration with default servers.
    pub fn new(service_id: impl Into<String>, service_token: impl Into<String>) -> Self {
        Self {
            framework_server: default_framework_server(),
            mqtt_server: default_mqtt_server(),
            service_id: service_id.into(),
            service_token: service_token.into(),
            http_timeout_secs: default_http_timeout(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }

    /// Set the framework server URI.
    pub fn with_framework_server(mut self, uri: impl Into<String>) -> Self {
        self.framework_server = normalize_framework_server(uri.into());
        self
    }

    /// Set the MQTT server URI.
    pub fn with_mqtt_server(mut self, uri: impl Into<String>) -> Self {
        self.mqtt_server = uri.into();
        self
    }

    /// Set the HTTP POST timeout.
    pub fn with_http_timeout_secs(mut self, secs: u64) -> Self {
        self.http_timeout_secs = secs;
        self
    }

    /// Check that all required fields are usable.
    pub fn validate(&self) -> Result<()> {
        if self.service_id.trim().is_empty() {
            return Err(Error::Config("service id must not be empty".to_string()));
        }
        if self.service_token.is_empty() {
            return Err(Error::Config("service token must not be empty".to_string()));
        }
        if self.framework_server.trim().is_empty() {
            return Err(Error::Config("framework server must not be empty".to_string()));
        }
        if self.mqtt_server.trim().is_empty() {
            return Err(Error::Config("mqtt server must not be empty".to_string()));
        }
        if self.http_timeout_secs == 0 {
            return Err(Error::Config("http timeout must be at least one second".to_string()));
        }
        if self.mailbox_capacity == 0 {
            return Err(Error::Config("mailbox capacity must be positive".to_string()));
        }
        Ok(())
    }
}

/// Strip trailing slashes so REST paths can be appended directly.
pub fn normalize_framework_server(uri: String) -> String {
    uri.trim().trim_end_matches('/').to_string()
}
