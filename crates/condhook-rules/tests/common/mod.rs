//! Shared test doubles for the rules integration tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use condhook_rules::{
    DeviceControl, DeviceSession, EvalexprEngine, ForwardError, Forwarder, Result,
};

/// Records every subscribe/publish instead of touching a bus.
#[derive(Default)]
pub struct RecordingControl {
    device_id: String,
    subscriptions: Mutex<BTreeSet<String>>,
    published: Mutex<Vec<(String, String)>>,
}

impl RecordingControl {
    pub fn new(device_id: &str) -> Arc<Self> {
        Arc::new(Self {
            device_id: device_id.to_string(),
            ..Default::default()
        })
    }

    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_on(&self, subtopic: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|(topic, _)| topic == subtopic)
            .map(|(_, payload)| payload)
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

#[async_trait]
impl DeviceControl for RecordingControl {
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

/// Records forwarded bodies, optionally failing every request.
#[derive(Default)]
pub struct RecordingForwarder {
    fail: bool,
    delay: Option<Duration>,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingForwarder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    /// Fail every request after `delay`.
    pub fn failing_after(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn forward(&self, uri: &str, body: String) -> std::result::Result<(), ForwardError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(ForwardError::Transport {
                uri: uri.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.sent.lock().unwrap().push((uri.to_string(), body));
        Ok(())
    }
}

pub fn config(condition: &str, value: &str, uri: &str) -> HashMap<String, String> {
    HashMap::from([
        ("expr".to_string(), condition.to_string()),
        ("value".to_string(), value.to_string()),
        ("uri".to_string(), uri.to_string()),
    ])
}

pub fn session(
    control: &Arc<RecordingControl>,
    forwarder: &Arc<RecordingForwarder>,
) -> DeviceSession {
    DeviceSession::new(
        control.clone(),
        Arc::new(EvalexprEngine::new()),
        forwarder.clone(),
    )
}
