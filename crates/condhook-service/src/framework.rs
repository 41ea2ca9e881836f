//! Framework REST client and service event wire types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::topics::default_device_endpoint;

/// One configuration entry of a thing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Where a thing publishes and receives messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubSubInfo {
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub endpoint: String,
}

/// A device linked to this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pubsub: PubSubInfo,
    #[serde(default)]
    pub config: Vec<KeyValue>,
}

impl ThingInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            pubsub: PubSubInfo::default(),
            config: Vec::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.push(KeyValue {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Config entries as a map. Later duplicates win.
    pub fn config_map(&self) -> HashMap<String, String> {
        self.config
            .iter()
            .map(|kv| (kv.key.clone(), kv.value.clone()))
            .collect()
    }

    /// The thing's topic root, falling back to the default device prefix.
    pub fn endpoint(&self) -> String {
        if self.pubsub.endpoint.trim().is_empty() {
            default_device_endpoint(&self.id)
        } else {
            self.pubsub.endpoint.trim_end_matches('/').to_string()
        }
    }
}

/// Event published by the framework on the service's events topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ServiceEvent {
    /// Thing linked to the service.
    New { thing: ThingInfo },
    /// Thing's service config edited.
    Update { thing: ThingInfo },
    /// Thing unlinked from the service.
    Delete { thing: ThingInfo },
}

impl ServiceEvent {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn thing(&self) -> &ThingInfo {
        match self {
            ServiceEvent::New { thing }
            | ServiceEvent::Update { thing }
            | ServiceEvent::Delete { thing } => thing,
        }
    }
}

/// REST access to the framework server.
#[derive(Debug, Clone)]
pub struct FrameworkClient {
    http: reqwest::Client,
    base: String,
    service_id: String,
    token: String,
}

impl FrameworkClient {
    pub fn new(
        http: reqwest::Client,
        base: impl Into<String>,
        service_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            service_id: service_id.into(),
            token: token.into(),
        }
    }

    pub fn things_url(&self) -> String {
        format!("{}/api/service/{}/things", self.base, self.service_id)
    }

    /// Things currently linked to this service.
    pub async fn fetch_things(&self) -> Result<Vec<ThingInfo>> {
        let url = self.things_url();
        debug!("Fetching linked things from {}", url);

        let things = self
            .http
            .get(&url)
            .basic_auth(&self.service_id, Some(&self.token))
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<ThingInfo>>()
            .await?;
        Ok(things)
    }
}
