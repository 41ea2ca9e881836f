//! MQTT implementation of [`DeviceControl`].

use std::sync::Arc;

use async_trait::async_trait;
use condhook_rules::{DeviceControl, Result as RuleResult, RuleError};
use dashmap::DashMap;
use rumqttc::{AsyncClient, QoS};

use crate::topics::{join, transducer_subtopic};

/// Destination of an input topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub device_id: String,
    pub variable: String,
}

/// Maps subscribed input topics back to their device and variable.
#[derive(Debug, Default)]
pub struct TopicRouter {
    routes: DashMap<String, Route>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, topic: impl Into<String>, device_id: &str, variable: &str) {
        self.routes.insert(
            topic.into(),
            Route {
                device_id: device_id.to_string(),
                variable: variable.to_string(),
            },
        );
    }

    pub fn remove(&self, topic: &str) -> Option<Route> {
        self.routes.remove(topic).map(|(_, route)| route)
    }

    pub fn lookup(&self, topic: &str) -> Option<Route> {
        self.routes.get(topic).map(|r| r.value().clone())
    }

    /// Drop every route of `device_id`, returning the topics removed.
    pub fn remove_device(&self, device_id: &str) -> Vec<String> {
        let topics: Vec<String> = self
            .routes
            .iter()
            .filter(|r| r.value().device_id == device_id)
            .map(|r| r.key().clone())
            .collect();
        for topic in &topics {
            self.routes.remove(topic);
        }
        topics
    }

    pub fn topics(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Device-scoped view of the shared MQTT client.
pub struct MqttDeviceControl {
    device_id: String,
    endpoint: String,
    client: AsyncClient,
    router: Arc<TopicRouter>,
}

impl MqttDeviceControl {
    pub fn new(
        device_id: impl Into<String>,
        endpoint: impl Into<String>,
        client: AsyncClient,
        router: Arc<TopicRouter>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            endpoint: endpoint.into(),
            client,
            router,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn input_topic(&self, variable: &str) -> String {
        join(&self.endpoint, &transducer_subtopic(variable))
    }
}

#[async_trait]
impl DeviceControl for MqttDeviceControl {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn subscribe(&self, variable: &str) -> RuleResult<()> {
        let topic = self.input_topic(variable);
        self.router.insert(topic.clone(), &self.device_id, variable);
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| RuleError::Control(e.to_string()))
    }

    async fn unsubscribe(&self, variable: &str) -> RuleResult<()> {
        let topic = self.input_topic(variable);
        self.router.remove(&topic);
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| RuleError::Control(e.to_string()))
    }

    async fn publish(&self, subtopic: &str, payload: Vec<u8>) -> RuleResult<()> {
        self.client
            .publish(join(&self.endpoint, subtopic), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| RuleError::Control(e.to_string()))
    }
}
