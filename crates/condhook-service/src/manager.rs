//! Device manager: one session actor per linked device.

use std::collections::HashMap;
use std::sync::Arc;

use condhook_rules::{
    DeviceControl, DeviceSession, ExpressionEngine, Forwarder, Result, RuleError, SessionHandle,
};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ManagedDevice {
    handle: SessionHandle,
    task: JoinHandle<()>,
    /// Last config accepted for this device.
    config: HashMap<String, String>,
}

/// Registry of device sessions.
///
/// A device stays registered after a rejected config so a later update can
/// arm it. Map entries are never held across an await.
pub struct DeviceManager {
    engine: Arc<dyn ExpressionEngine>,
    forwarder: Arc<dyn Forwarder>,
    mailbox_capacity: usize,
    devices: DashMap<String, ManagedDevice>,
}

impl DeviceManager {
    pub fn new(
        engine: Arc<dyn ExpressionEngine>,
        forwarder: Arc<dyn Forwarder>,
        mailbox_capacity: usize,
    ) -> Self {
        Self {
            engine,
            forwarder,
            mailbox_capacity,
            devices: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.key().clone()).collect()
    }

    /// Config last accepted for `device_id`.
    pub fn config(&self, device_id: &str) -> Option<HashMap<String, String>> {
        self.devices.get(device_id).map(|d| d.config.clone())
    }

    /// Link a device, creating its session on first use.
    pub async fn link(
        &self,
        control: Arc<dyn DeviceControl>,
        config: HashMap<String, String>,
    ) -> Result<()> {
        let device_id = control.device_id().to_string();
        let handle = self.handle_or_spawn(control);

        let result = handle.link(config.clone()).await;
        match &result {
            Ok(()) => {
                if let Some(mut device) = self.devices.get_mut(&device_id) {
                    device.config = config;
                }
                info!(device_id = %device_id, "Device linked");
            }
            Err(e) => warn!(device_id = %device_id, "Device link rejected: {}", e),
        }
        result
    }

    /// Apply a new full config for a device. Unknown devices are linked.
    pub async fn update(
        &self,
        control: Arc<dyn DeviceControl>,
        config: HashMap<String, String>,
    ) -> Result<()> {
        let device_id = control.device_id().to_string();
        let existing = self
            .devices
            .get(&device_id)
            .map(|d| (d.handle.clone(), d.config.clone()));

        let Some((handle, original)) = existing else {
            return self.link(control, config).await;
        };

        let changes = changed_keys(&original, &config);
        if changes.is_empty() && !original.is_empty() {
            debug!(device_id = %device_id, "Config unchanged");
            return Ok(());
        }

        let result = handle.config_change(changes, original).await;
        match &result {
            Ok(()) => {
                if let Some(mut device) = self.devices.get_mut(&device_id) {
                    device.config = config;
                }
                info!(device_id = %device_id, "Device config updated");
            }
            Err(e) => warn!(device_id = %device_id, "Device config change rejected: {}", e),
        }
        result
    }

    /// Unlink and forget a device. Returns false if it was not registered.
    pub async fn unlink(&self, device_id: &str) -> bool {
        let Some((_, device)) = self.devices.remove(device_id) else {
            return false;
        };

        if let Err(e) = device.handle.unlink().await {
            debug!(device_id = %device_id, "Session already closed: {}", e);
        }
        if let Err(e) = device.task.await {
            warn!(device_id = %device_id, "Session task failed: {}", e);
        }
        info!(device_id = %device_id, "Device unlinked");
        true
    }

    /// Queue a message for a device without waiting.
    pub fn dispatch(&self, device_id: &str, variable: &str, payload: Vec<u8>) -> Result<()> {
        let handle = self
            .devices
            .get(device_id)
            .map(|d| d.handle.clone())
            .ok_or(RuleError::SessionClosed)?;

        handle.try_deliver(variable, payload).inspect_err(|e| {
            warn!(device_id = %device_id, variable = %variable, "Dropping message: {}", e);
        })
    }

    /// Unlink every device.
    pub async fn shutdown(&self) {
        let ids = self.device_ids();
        info!("Stopping {} device sessions", ids.len());
        for id in ids {
            self.unlink(&id).await;
        }
    }

    fn handle_or_spawn(&self, control: Arc<dyn DeviceControl>) -> SessionHandle {
        let device_id = control.device_id().to_string();
        self.devices
            .entry(device_id)
            .or_insert_with(|| {
                let session =
                    DeviceSession::new(control, self.engine.clone(), self.forwarder.clone());
                let (handle, task) = SessionHandle::spawn(session, self.mailbox_capacity);
                ManagedDevice {
                    handle,
                    task,
                    config: HashMap::new(),
                }
            })
            .handle
            .clone()
    }
}

/// Entries of `new` that differ from `original`. Keys dropped from `new`
/// are reported as empty.
fn changed_keys(
    original: &HashMap<String, String>,
    new: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut changes: HashMap<String, String> = new
        .iter()
        .filter(|(k, v)| original.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for key in original.keys() {
        if !new.contains_key(key) {
            changes.insert(key.clone(), String::new());
        }
    }
    changes
}
