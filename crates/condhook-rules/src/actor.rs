//! Single-task actor around a [`DeviceSession`].
//!
//! Every operation on a session goes through its mailbox, so link, config
//! change, message and unlink events for one device are handled one at a
//! time and in arrival order. Different devices run on different tasks.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Result, RuleError};
use crate::session::DeviceSession;

/// Commands accepted by a session actor.
#[derive(Debug)]
pub enum SessionCommand {
    Link {
        config: HashMap<String, String>,
        reply: oneshot::Sender<Result<()>>,
    },
    ConfigChange {
        changes: HashMap<String, String>,
        original: HashMap<String, String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Message {
        variable: String,
        payload: Vec<u8>,
    },
    Unlink {
        reply: oneshot::Sender<()>,
    },
}

/// Sending side of a session actor.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    device_id: String,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Move `session` onto its own task.
    pub fn spawn(session: DeviceSession, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let device_id = session.device_id().to_string();
        let task = tokio::spawn(run(session, rx));
        (Self { device_id, tx }, task)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn link(&self, config: HashMap<String, String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Link { config, reply }).await?;
        rx.await.map_err(|_| RuleError::SessionClosed)?
    }

    pub async fn config_change(
        &self,
        changes: HashMap<String, String>,
        original: HashMap<String, String>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::ConfigChange {
            changes,
            original,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RuleError::SessionClosed)?
    }

    /// Queue a message, waiting for mailbox capacity.
    pub async fn deliver(&self, variable: impl Into<String>, payload: Vec<u8>) -> Result<()> {
        self.send(SessionCommand::Message {
            variable: variable.into(),
            payload,
        })
        .await
    }

    /// Queue a message without waiting. Fails when the mailbox is full.
    pub fn try_deliver(&self, variable: impl Into<String>, payload: Vec<u8>) -> Result<()> {
        self.tx
            .try_send(SessionCommand::Message {
                variable: variable.into(),
                payload,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => RuleError::MailboxFull,
                mpsc::error::TrySendError::Closed(_) => RuleError::SessionClosed,
            })
    }

    /// Unlink the session and wait until the actor has released it.
    pub async fn unlink(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Unlink { reply }).await?;
        rx.await.map_err(|_| RuleError::SessionClosed)
    }

    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RuleError::SessionClosed)
    }
}

async fn run(mut session: DeviceSession, mut rx: mpsc::Receiver<SessionCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            SessionCommand::Link { config, reply } => {
                let _ = reply.send(session.on_link(&config).await);
            }
            SessionCommand::ConfigChange {
                changes,
                original,
                reply,
            } => {
                let _ = reply.send(session.on_config_change(&changes, &original).await);
            }
            SessionCommand::Message { variable, payload } => {
                session.on_message(&variable, &payload).await;
            }
            SessionCommand::Unlink { reply } => {
                session.on_unlink().await;
                let _ = reply.send(());
                break;
            }
        }
    }
    debug!(device_id = %session.device_id(), "Session actor stopped");
}
