//! Rule evaluation for condhook.
//!
//! A [`DeviceSession`] holds one device's compiled condition and value
//! expressions together with the latest value seen for each variable. Every
//! inbound message updates that state and re-evaluates the rule; when the
//! condition holds, the computed value is published and optionally POSTed
//! to an HTTP endpoint.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use condhook_rules::{DeviceControl, DeviceSession, EvalexprEngine, HttpForwarder};
//!
//! async fn arm(control: Arc<dyn DeviceControl>) -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(EvalexprEngine::new());
//!     let forwarder = Arc::new(HttpForwarder::new(Duration::from_secs(10))?);
//!     let mut session = DeviceSession::new(control, engine, forwarder);
//!
//!     let config = HashMap::from([
//!         ("expr".to_string(), "temp > 30".to_string()),
//!         ("value".to_string(), "temp * 1.8 + 32".to_string()),
//!         ("uri".to_string(), String::new()),
//!     ]);
//!     session.on_link(&config).await?;
//!     session.on_message("temp", b"31.5").await;
//!     Ok(())
//! }
//! ```

pub mod actor;
pub mod error;
pub mod expression;
pub mod forward;
pub mod session;

pub use actor::{SessionCommand, SessionHandle};
pub use error::{Result, RuleError};
pub use expression::{
    CompiledExpression, EvalValue, EvalexprEngine, ExpressionEngine, ExpressionError,
};
pub use forward::{ForwardError, Forwarder, HttpForwarder};
pub use session::{
    DeviceControl, DeviceSession, MessageOutcome, RuleConfig, CONFIG_CONDITION, CONFIG_URI,
    CONFIG_VALUE, TOPIC_ERR, TOPIC_OUT, TRANSDUCER_PREFIX,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
