//! Per-device rule session.
//!
//! A session is created when the framework links a device to this service.
//! Linking compiles the device's condition and value expressions and
//! subscribes to every variable the condition reads. Each inbound message
//! then updates the variable map and re-evaluates the rule.
//!
//! ```text
//! transducer/<var> ──→ parse f64 ──→ latest_values ──→ condition ──→ value
//!                          │                              │            │
//!                          └──→ transducer/err ←──────────┴────────────┤
//!                                                                      ├──→ transducer/out
//!                                                                      └──→ HTTP POST (uri)
//! ```
//!
//! Sessions are not synchronized internally; the caller must serialize
//! calls (see [`crate::actor::SessionHandle`]).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Result, RuleError};
use crate::expression::{CompiledExpression, ExpressionEngine};
use crate::forward::Forwarder;

/// Config key holding the condition expression.
pub const CONFIG_CONDITION: &str = "expr";
/// Config key holding the value expression.
pub const CONFIG_VALUE: &str = "value";
/// Config key holding the optional POST target.
pub const CONFIG_URI: &str = "uri";

/// Device subtopic prefix for input variables.
pub const TRANSDUCER_PREFIX: &str = "transducer";
/// Device subtopic for computed values.
pub const TOPIC_OUT: &str = "transducer/out";
/// Device subtopic for recoverable errors.
pub const TOPIC_ERR: &str = "transducer/err";

/// Bus operations a session needs from the hosting framework.
///
/// Implementations map a variable name to the device's
/// `transducer/<name>` topic and deliver its messages back to the session.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Id of the device this control belongs to.
    fn device_id(&self) -> &str;

    async fn subscribe(&self, variable: &str) -> Result<()>;

    async fn unsubscribe(&self, variable: &str) -> Result<()>;

    /// Publish on a device subtopic such as [`TOPIC_OUT`].
    async fn publish(&self, subtopic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Rule configuration as delivered by the framework.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub condition: String,
    pub value: String,
    #[serde(default)]
    pub uri: String,
}

impl RuleConfig {
    /// Read the recognized keys from a framework config map.
    /// Missing keys read as empty.
    pub fn from_map(config: &HashMap<String, String>) -> Self {
        let get = |key: &str| config.get(key).cloned().unwrap_or_default();
        Self {
            condition: get(CONFIG_CONDITION),
            value: get(CONFIG_VALUE),
            uri: get(CONFIG_URI).trim().to_string(),
        }
    }
}

/// What happened to a single inbound message.
#[derive(Debug)]
pub enum MessageOutcome {
    /// Session is not armed or already unlinked.
    Inactive,
    /// The variable is not read by the condition.
    UnknownVariable,
    /// Payload was not a number; an error was published.
    InvalidPayload,
    /// Condition or value evaluation failed; an error was published.
    EvaluationFailed,
    /// Condition evaluated to anything but `true`.
    ConditionNotMet,
    /// Value was published on [`TOPIC_OUT`]. `forward` is set when a POST
    /// was started; see [`DeviceSession::wait_forwards`].
    Emitted { value: String, forward: bool },
}

impl MessageOutcome {
    pub fn is_emitted(&self) -> bool {
        matches!(self, MessageOutcome::Emitted { .. })
    }
}

#[derive(Debug)]
struct ArmedRule {
    condition: Box<dyn CompiledExpression>,
    value: Box<dyn CompiledExpression>,
    output_uri: String,
    subscribed: BTreeSet<String>,
}

#[derive(Debug)]
enum SessionState {
    Unarmed,
    Armed(ArmedRule),
    Unlinked,
}

/// Rule state for one linked device.
pub struct DeviceSession {
    control: Arc<dyn DeviceControl>,
    engine: Arc<dyn ExpressionEngine>,
    forwarder: Arc<dyn Forwarder>,
    state: SessionState,
    latest_values: HashMap<String, f64>,
    /// In-flight POSTs. Aborted on unlink and when the session is dropped.
    forwards: JoinSet<()>,
}

impl DeviceSession {
    pub fn new(
        control: Arc<dyn DeviceControl>,
        engine: Arc<dyn ExpressionEngine>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        Self {
            control,
            engine,
            forwarder,
            state: SessionState::Unarmed,
            latest_values: HashMap::new(),
            forwards: JoinSet::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        self.control.device_id()
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, SessionState::Armed(_))
    }

    pub fn is_unlinked(&self) -> bool {
        matches!(self.state, SessionState::Unlinked)
    }

    pub fn latest_values(&self) -> &HashMap<String, f64> {
        &self.latest_values
    }

    /// Variables the session is subscribed to; empty unless armed.
    pub fn subscribed_variables(&self) -> BTreeSet<String> {
        match &self.state {
            SessionState::Armed(rule) => rule.subscribed.clone(),
            _ => BTreeSet::new(),
        }
    }

    pub fn condition_source(&self) -> Option<&str> {
        match &self.state {
            SessionState::Armed(rule) => Some(rule.condition.source()),
            _ => None,
        }
    }

    pub fn value_source(&self) -> Option<&str> {
        match &self.state {
            SessionState::Armed(rule) => Some(rule.value.source()),
            _ => None,
        }
    }

    pub fn output_uri(&self) -> Option<&str> {
        match &self.state {
            SessionState::Armed(rule) => Some(rule.output_uri.as_str()),
            _ => None,
        }
    }

    /// Compile `config` and arm the session.
    ///
    /// On a compile error nothing changes: the previous rule, values and
    /// subscriptions stay in place.
    pub async fn on_link(&mut self, config: &HashMap<String, String>) -> Result<()> {
        if self.is_unlinked() {
            return Err(RuleError::SessionClosed);
        }

        let rule = self.compile(&RuleConfig::from_map(config))?;

        let previous = self.subscribed_variables();
        for variable in previous.difference(&rule.subscribed) {
            if let Err(e) = self.control.unsubscribe(variable).await {
                warn!(device_id = %self.device_id(), variable = %variable, "Failed to unsubscribe: {}", e);
            }
        }
        for variable in rule.subscribed.difference(&previous) {
            if let Err(e) = self.control.subscribe(variable).await {
                warn!(device_id = %self.device_id(), variable = %variable, "Failed to subscribe: {}", e);
            }
        }

        info!(
            device_id = %self.device_id(),
            condition = %rule.condition.source(),
            value = %rule.value.source(),
            uri = %rule.output_uri,
            variables = ?rule.subscribed,
            "Device rule armed"
        );

        self.latest_values.clear();
        self.state = SessionState::Armed(rule);
        Ok(())
    }

    /// Apply a config edit by relinking with `original` overlaid by `changes`.
    pub async fn on_config_change(
        &mut self,
        changes: &HashMap<String, String>,
        original: &HashMap<String, String>,
    ) -> Result<()> {
        let mut merged = original.clone();
        merged.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));

        debug!(device_id = %self.device_id(), changes = ?changes, "Processing config change");
        self.on_link(&merged).await.inspect_err(|e| {
            warn!(device_id = %self.device_id(), "Config change rejected, keeping previous rule: {}", e);
        })
    }

    /// Release the session. Pending POSTs are cancelled and later messages
    /// are ignored.
    pub async fn on_unlink(&mut self) {
        self.forwards.abort_all();
        while self.forwards.join_next().await.is_some() {}

        for variable in self.subscribed_variables() {
            if let Err(e) = self.control.unsubscribe(&variable).await {
                warn!(device_id = %self.device_id(), variable = %variable, "Failed to unsubscribe: {}", e);
            }
        }
        self.state = SessionState::Unlinked;
        self.latest_values.clear();
        debug!(device_id = %self.device_id(), "Unlinked");
    }

    /// Handle one value for `variable`.
    pub async fn on_message(&mut self, variable: &str, payload: &[u8]) -> MessageOutcome {
        let rule = match &self.state {
            SessionState::Armed(rule) => rule,
            _ => {
                debug!(device_id = %self.control.device_id(), variable, "Message for inactive session dropped");
                return MessageOutcome::Inactive;
            }
        };

        if !rule.subscribed.contains(variable) {
            debug!(device_id = %self.control.device_id(), variable, "Message for unknown variable dropped");
            return MessageOutcome::UnknownVariable;
        }

        let parsed = match parse_payload(payload) {
            Ok(v) => v,
            Err(e) => {
                publish_error(self.control.as_ref(), &e).await;
                return MessageOutcome::InvalidPayload;
            }
        };

        self.latest_values.insert(variable.to_string(), parsed);

        match rule.condition.evaluate(&self.latest_values) {
            Ok(result) if result.is_true() => {}
            Ok(_) => return MessageOutcome::ConditionNotMet,
            Err(e) => {
                publish_error(self.control.as_ref(), &RuleError::Evaluation(e)).await;
                return MessageOutcome::EvaluationFailed;
            }
        }

        let value = match rule.value.evaluate(&self.latest_values) {
            Ok(v) => v.to_string(),
            Err(e) => {
                publish_error(self.control.as_ref(), &RuleError::Evaluation(e)).await;
                return MessageOutcome::EvaluationFailed;
            }
        };

        debug!(device_id = %self.control.device_id(), value = %value, "Condition met");
        if let Err(e) = self
            .control
            .publish(TOPIC_OUT, value.clone().into_bytes())
            .await
        {
            warn!(device_id = %self.control.device_id(), "Failed to publish value: {}", e);
        }

        let forward = !rule.output_uri.is_empty();
        if forward {
            let uri = rule.output_uri.clone();
            self.spawn_forward(uri, value.clone());
        }

        MessageOutcome::Emitted { value, forward }
    }

    fn compile(&self, config: &RuleConfig) -> Result<ArmedRule> {
        let condition = self
            .engine
            .compile(&config.condition)
            .map_err(|e| RuleError::Compile {
                field: "condition",
                message: e.to_string(),
            })?;
        let value = self
            .engine
            .compile(&config.value)
            .map_err(|e| RuleError::Compile {
                field: "value",
                message: e.to_string(),
            })?;

        let subscribed = condition.free_variables();
        Ok(ArmedRule {
            condition,
            value,
            output_uri: config.uri.clone(),
            subscribed,
        })
    }

    /// Wait for every in-flight POST to finish.
    pub async fn wait_forwards(&mut self) {
        while self.forwards.join_next().await.is_some() {}
    }

    /// Number of POSTs still running.
    pub fn pending_forwards(&self) -> usize {
        self.forwards.len()
    }

    /// POST off the session's critical path. The forwarder's timeout bounds
    /// the task.
    fn spawn_forward(&mut self, uri: String, body: String) {
        while self.forwards.try_join_next().is_some() {}

        let forwarder = self.forwarder.clone();
        let control = self.control.clone();
        self.forwards.spawn(async move {
            if let Err(e) = forwarder.forward(&uri, body).await {
                publish_error(control.as_ref(), &RuleError::Forwarding(e)).await;
            }
        });
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device_id", &self.device_id())
            .field("state", &self.state)
            .field("latest_values", &self.latest_values)
            .field("pending_forwards", &self.forwards.len())
            .finish()
    }
}

fn parse_payload(payload: &[u8]) -> Result<f64> {
    let text = std::str::from_utf8(payload).map_err(|e| RuleError::Payload(e.to_string()))?;
    let text = text.trim_matches(|c: char| c.is_ascii_whitespace());
    text.parse::<f64>()
        .map_err(|e| RuleError::Payload(format!("'{}': {}", text, e)))
}

async fn publish_error(control: &dyn DeviceControl, error: &RuleError) {
    debug!(device_id = %control.device_id(), "{}", error);
    if let Err(e) = control
        .publish(TOPIC_ERR, error.to_string().into_bytes())
        .await
    {
        warn!(device_id = %control.device_id(), "Failed to publish error: {}", e);
    }
}
