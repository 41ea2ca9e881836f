//! Framework glue for condhook.
//!
//! Connects the rules engine to the device framework: an MQTT bus for
//! device telemetry and service events, a REST client for the initial list
//! of linked devices, and a manager that keeps one session actor per device.
//!
//! ## Topic Format
//!
//! ```text
//! openchirp/service/{service_id}/status          service status
//! openchirp/service/{service_id}/thing/events    link / update / unlink events
//! openchirp/service/{service_id}/thing/status    per-device link results
//! {device_endpoint}/transducer/{variable}        device inputs
//! {device_endpoint}/transducer/out               computed values
//! {device_endpoint}/transducer/err               recoverable errors
//! ```

pub mod client;
pub mod control;
pub mod error;
pub mod framework;
pub mod manager;
pub mod mqtt;
pub mod topics;

pub use client::ServiceClient;
pub use control::{MqttDeviceControl, Route, TopicRouter};
pub use error::{Result, ServiceError};
pub use framework::{FrameworkClient, KeyValue, PubSubInfo, ServiceEvent, ThingInfo};
pub use manager::DeviceManager;
pub use mqtt::{BusEvent, MqttBus, MqttConfig};
pub use topics::ServiceTopics;
