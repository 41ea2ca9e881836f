//! Service client: bus loop, framework events and status reporting.
//!
//! ```text
//! MqttBus ──BusEvent──→ dispatch loop ──→ TopicRouter ──→ DeviceManager::dispatch
//!                            │
//!                            └── thing/events ──→ event task ──→ link / update / unlink
//! ```
//!
//! The dispatch loop never awaits a session or the broker, so a slow
//! device cannot stall the MQTT event loop.

use std::sync::Arc;
use std::time::Duration;

use condhook_core::ServiceConfig;
use condhook_rules::{DeviceControl, ExpressionEngine, Forwarder, RuleError};
use rumqttc::{AsyncClient, QoS};
use serde_json::json;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::control::{MqttDeviceControl, TopicRouter};
use crate::error::{Result, ServiceError};
use crate::framework::{FrameworkClient, ServiceEvent, ThingInfo};
use crate::manager::DeviceManager;
use crate::mqtt::{BusEvent, MqttBus, MqttConfig};
use crate::topics::ServiceTopics;

/// Timeout for REST calls to the framework server.
const FRAMEWORK_TIMEOUT: Duration = Duration::from_secs(30);

/// State shared between the client and its background tasks.
struct ServiceShared {
    topics: ServiceTopics,
    client: AsyncClient,
    router: Arc<TopicRouter>,
    manager: DeviceManager,
}

impl ServiceShared {
    fn control_for(&self, thing: &ThingInfo) -> Arc<dyn DeviceControl> {
        Arc::new(MqttDeviceControl::new(
            thing.id.clone(),
            thing.endpoint(),
            self.client.clone(),
            self.router.clone(),
        ))
    }

    async fn handle_event(&self, event: ServiceEvent) {
        match event {
            ServiceEvent::New { thing } => {
                info!(device_id = %thing.id, "Link event");
                let result = self
                    .manager
                    .link(self.control_for(&thing), thing.config_map())
                    .await;
                self.report_device_status(&thing.id, &result).await;
            }
            ServiceEvent::Update { thing } => {
                info!(device_id = %thing.id, "Config update event");
                let result = self
                    .manager
                    .update(self.control_for(&thing), thing.config_map())
                    .await;
                self.report_device_status(&thing.id, &result).await;
            }
            ServiceEvent::Delete { thing } => {
                info!(device_id = %thing.id, "Unlink event");
                if !self.manager.unlink(&thing.id).await {
                    debug!(device_id = %thing.id, "Unlink for unknown device");
                }
                self.router.remove_device(&thing.id);
            }
        }
    }

    /// Surface a link/config result to whoever manages the device.
    async fn report_device_status(&self, device_id: &str, result: &std::result::Result<(), RuleError>) {
        let (message, ok) = match result {
            Ok(()) => ("Success".to_string(), true),
            Err(e) => (e.to_string(), false),
        };
        let payload = json!({
            "thing": {
                "id": device_id,
                "status": { "message": message, "ok": ok },
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Err(e) = self
            .client
            .publish(
                self.topics.thing_status(),
                QoS::AtLeastOnce,
                false,
                payload.to_string(),
            )
            .await
        {
            warn!(device_id = %device_id, "Failed to publish device status: {}", e);
        }
    }

    fn route(&self, topic: &str, payload: Vec<u8>) {
        match self.router.lookup(topic) {
            Some(route) => {
                let _ = self
                    .manager
                    .dispatch(&route.device_id, &route.variable, payload);
            }
            None => debug!("No route for topic {}", topic),
        }
    }

    /// Restore subscriptions after the broker lost our session.
    async fn resubscribe(&self) {
        let mut topics = self.router.topics();
        topics.push(self.topics.thing_events());
        info!("Resubscribing to {} topics", topics.len());
        for topic in topics {
            if let Err(e) = self.client.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                warn!("Failed to resubscribe to {}: {}", topic, e);
            }
        }
    }
}

/// Running service: owns the bus and all device sessions.
pub struct ServiceClient {
    shared: Arc<ServiceShared>,
    framework: FrameworkClient,
    bus: Mutex<Option<MqttBus>>,
    closed: watch::Receiver<bool>,
}

impl ServiceClient {
    /// Connect to the broker and start processing service events. Devices
    /// already linked are picked up by [`ServiceClient::link_existing`].
    pub async fn connect(
        config: &ServiceConfig,
        engine: Arc<dyn ExpressionEngine>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Result<Self> {
        config.validate()?;

        let mqtt = MqttConfig::from_uri(&config.mqtt_server)?
            .with_auth(&config.service_id, &config.service_token)
            .with_client_id(format!("condhook-{}-{}", config.service_id, uuid::Uuid::new_v4()));

        let http = reqwest::Client::builder().timeout(FRAMEWORK_TIMEOUT).build()?;
        let framework = FrameworkClient::new(
            http,
            &config.framework_server,
            &config.service_id,
            &config.service_token,
        );

        let (bus, incoming) = MqttBus::connect(&mqtt);
        let topics = ServiceTopics::new(&config.service_id);
        bus.subscribe(&topics.thing_events()).await?;

        let shared = Arc::new(ServiceShared {
            topics,
            client: bus.client().clone(),
            router: Arc::new(TopicRouter::new()),
            manager: DeviceManager::new(engine, forwarder, config.mailbox_capacity),
        });

        let (closed_tx, closed) = watch::channel(false);
        tokio::spawn(dispatch_loop(shared.clone(), incoming, closed_tx));

        Ok(Self {
            shared,
            framework,
            bus: Mutex::new(Some(bus)),
            closed,
        })
    }

    /// Link every thing the framework reports for this service. Returns the
    /// number of things seen; rejected configs are reported per device.
    pub async fn link_existing(&self) -> Result<usize> {
        let things = self.framework.fetch_things().await?;
        info!("Framework reports {} linked things", things.len());
        let count = things.len();
        for thing in things {
            self.shared.handle_event(ServiceEvent::New { thing }).await;
        }
        Ok(count)
    }

    pub fn manager(&self) -> &DeviceManager {
        &self.shared.manager
    }

    /// Publish the service status message.
    pub async fn set_status(&self, message: &str) -> Result<()> {
        let payload = json!({ "message": message }).to_string();
        self.shared
            .client
            .publish(self.shared.topics.status(), QoS::AtLeastOnce, false, payload)
            .await?;
        debug!("Published service status '{}'", message);
        Ok(())
    }

    /// Resolve once the bus connection is gone.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|c| *c).await;
    }

    /// Unlink every device. Nothing is published for devices afterwards.
    pub async fn stop_devices(&self) {
        self.shared.manager.shutdown().await;
    }

    /// Flush pending publishes and close the connection.
    pub async fn disconnect(&self) -> Result<()> {
        match self.bus.lock().await.take() {
            Some(bus) => bus.disconnect().await,
            None => Err(ServiceError::Mqtt("already disconnected".to_string())),
        }
    }
}

async fn dispatch_loop(
    shared: Arc<ServiceShared>,
    mut incoming: mpsc::UnboundedReceiver<BusEvent>,
    closed: watch::Sender<bool>,
) {
    // Service events are applied one at a time, in order, off this loop.
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ServiceEvent>();
    let event_worker = {
        let shared = shared.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                shared.handle_event(event).await;
            }
        })
    };

    let events_topic = shared.topics.thing_events();
    let mut connected_once = false;

    while let Some(event) = incoming.recv().await {
        match event {
            BusEvent::Publish { topic, payload } if topic == events_topic => {
                match ServiceEvent::parse(&payload) {
                    Ok(event) => {
                        let _ = events_tx.send(event);
                    }
                    Err(e) => warn!("Ignoring malformed service event: {}", e),
                }
            }
            BusEvent::Publish { topic, payload } => shared.route(&topic, payload),
            BusEvent::Connected { session_present } => {
                if connected_once && !session_present {
                    let shared = shared.clone();
                    tokio::spawn(async move { shared.resubscribe().await });
                }
                connected_once = true;
            }
        }
    }

    error!("MQTT connection lost");
    drop(events_tx);
    if let Err(e) = event_worker.await {
        warn!("Service event task failed: {}", e);
    }
    let _ = closed.send(true);
}
