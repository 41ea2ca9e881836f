//! MQTT bus using rumqttc.
//!
//! [`MqttBus`] owns the rumqttc event loop on a background task and turns
//! incoming packets into [`BusEvent`]s on an unbounded channel, so the loop
//! never waits on a consumer.

use std::time::Duration;

use condhook_core::config::defaults;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS, Transport};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, ServiceError};

/// Consecutive event loop errors tolerated before the bus gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// MQTT connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host.
    pub broker: String,

    /// Broker port (default 1883 for non-TLS, 8883 for TLS).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,

    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    /// Use TLS with the platform's root certificates.
    #[serde(default)]
    pub tls: bool,
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    defaults::MQTT_KEEP_ALIVE_SECS
}

fn default_clean_session() -> bool {
    true
}

impl MqttConfig {
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            port: default_port(),
            client_id: None,
            username: None,
            password: None,
            keep_alive: default_keep_alive(),
            clean_session: default_clean_session(),
            tls: false,
        }
    }

    /// Parse `scheme://host[:port]`. `tcp` and `mqtt` are plain, `tls`,
    /// `ssl` and `mqtts` use TLS.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let url = url::Url::parse(uri)
            .map_err(|e| ServiceError::Config(format!("invalid MQTT server '{}': {}", uri, e)))?;

        let tls = match url.scheme() {
            "tcp" | "mqtt" => false,
            "tls" | "ssl" | "mqtts" => true,
            other => {
                return Err(ServiceError::Config(format!(
                    "unsupported MQTT scheme '{}' in '{}'",
                    other, uri
                )))
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ServiceError::Config(format!("MQTT server '{}' has no host", uri)))?;

        let config = Self::new(host).with_tls(tls);
        Ok(match url.port() {
            Some(port) => config.with_port(port),
            None => config,
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        if tls && self.port == 1883 {
            self.port = 8883;
        }
        self
    }

    /// Get the full broker address.
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }

    fn to_options(&self) -> MqttOptions {
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| format!("condhook-{}", uuid::Uuid::new_v4()));

        let mut opts = MqttOptions::new(client_id, &self.broker, self.port);
        opts.set_keep_alive(Duration::from_secs(self.keep_alive));
        opts.set_clean_session(self.clean_session);

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            opts.set_credentials(username, password);
        }
        if self.tls {
            opts.set_transport(Transport::tls_with_default_config());
        }
        opts
    }
}

/// Something the bus observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// The broker acknowledged a (re)connect.
    Connected { session_present: bool },
    /// A message arrived on a subscribed topic.
    Publish { topic: String, payload: Vec<u8> },
}

/// Connected MQTT client plus its event loop task.
pub struct MqttBus {
    client: AsyncClient,
    event_loop: JoinHandle<()>,
}

impl MqttBus {
    /// Start the client. Events arrive on the returned receiver, which
    /// closes when the connection is given up or disconnected.
    pub fn connect(config: &MqttConfig) -> (Self, mpsc::UnboundedReceiver<BusEvent>) {
        let (client, mut eventloop) =
            AsyncClient::new(config.to_options(), defaults::MQTT_CHANNEL_CAPACITY);
        let (tx, rx) = mpsc::unbounded_channel();
        let broker = config.broker_addr();

        info!("Connecting to MQTT broker {}", broker);
        let event_loop = tokio::spawn(async move {
            let mut error_count = 0;

            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        error_count = 0;
                        let event = BusEvent::Publish {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                        };
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        error_count = 0;
                        info!("MQTT broker {} connection acknowledged", broker);
                        let event = BusEvent::Connected {
                            session_present: ack.session_present,
                        };
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("MQTT disconnect sent");
                        break;
                    }
                    Ok(_) => {
                        error_count = 0;
                    }
                    Err(e) => {
                        error_count += 1;
                        if error_count >= MAX_CONSECUTIVE_ERRORS {
                            error!(
                                "MQTT broker {} error count reached {}, stopping: {}",
                                broker, MAX_CONSECUTIVE_ERRORS, e
                            );
                            break;
                        }
                        warn!(
                            "MQTT broker {} error ({}/{}): {}",
                            broker, error_count, MAX_CONSECUTIVE_ERRORS, e
                        );
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
            info!("MQTT broker {} connection closed", broker);
        });

        (Self { client, event_loop }, rx)
    }

    pub fn client(&self) -> &AsyncClient {
        &self.client
    }

    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        self.client.subscribe(topic, QoS::AtLeastOnce).await?;
        Ok(())
    }

    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    /// Queue a disconnect behind everything already published and wait for
    /// the event loop to finish.
    pub async fn disconnect(self) -> Result<()> {
        self.client.disconnect().await?;
        if let Err(e) = self.event_loop.await {
            warn!("MQTT event loop task failed: {}", e);
        }
        Ok(())
    }
}
