//! Outbound forwarding of computed values.

use std::time::Duration;

use async_trait::async_trait;

/// Errors from the optional HTTP POST step.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid uri '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("request to {uri} failed: {reason}")]
    Transport { uri: String, reason: String },

    #[error("http client error: {0}")]
    Client(String),
}

/// Delivers a computed value to an external endpoint.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, uri: &str, body: String) -> Result<(), ForwardError>;
}

/// Forwards values as `text/plain` HTTP POST bodies.
///
/// One client is shared by every session; the timeout bounds the whole
/// request including connect.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForwardError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Use an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Parse `uri` and reject anything that is not http(s).
pub fn parse_target(uri: &str) -> Result<url::Url, ForwardError> {
    let url = url::Url::parse(uri).map_err(|e| ForwardError::InvalidUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ForwardError::InvalidUri {
            uri: uri.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, uri: &str, body: String) -> Result<(), ForwardError> {
        let url = parse_target(uri)?;

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await
            .map_err(|e| ForwardError::Transport {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(uri, status = status.as_u16(), "Forwarded value");
        } else {
            tracing::warn!(uri, status = status.as_u16(), "Forward target returned non-success status");
        }
        Ok(())
    }
}
