//! Test doubles for the service integration tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use condhook_rules::{DeviceControl, EvalexprEngine, ForwardError, Forwarder, Result};
use condhook_service::DeviceManager;

/// Control that records subscriptions and publishes in memory.
#[derive(Default)]
pub struct MemoryControl {
    device_id: String,
    subscriptions: Mutex<BTreeSet<String>>,
    published: Mutex<Vec<(String, String)>>,
}

impl MemoryControl {
    pub fn new(device_id: &str) -> Arc<Self> {
        Arc::new(Self {
            device_id: device_id.to_string(),
            ..Default::default()
        })
    }

    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn published_on(&self, subtopic: &str) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(topic, _)| topic == subtopic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl DeviceControl for MemoryControl {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn subscribe(&self, variable: &str) -> Result<()> {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(variable.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, variable: &str) -> Result<()> {
        self.subscriptions.lock().unwrap().remove(variable);
        Ok(())
    }

    async fn publish(&self, subtopic: &str, payload: Vec<u8>) -> Result<()> {
        self.published.lock().unwrap().push((
            subtopic.to_string(),
            String::from_utf8_lossy(&payload).into_owned(),
        ));
        Ok(())
    }
}

/// Forwarder that accepts and drops everything.
pub struct NullForwarder;

#[async_trait]
impl Forwarder for NullForwarder {
    async fn forward(&self, _uri: &str, _body: String) -> std::result::Result<(), ForwardError> {
        Ok(())
    }
}

pub fn manager() -> DeviceManager {
    DeviceManager::new(Arc::new(EvalexprEngine::new()), Arc::new(NullForwarder), 16)
}

pub fn config(condition: &str, value: &str) -> HashMap<String, String> {
    HashMap::from([
        ("expr".to_string(), condition.to_string()),
        ("value".to_string(), value.to_string()),
        ("uri".to_string(), String::new()),
    ])
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
