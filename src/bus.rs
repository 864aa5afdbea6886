//! Cross-process command bus.
//!
//! Non-owning processes publish a [`Command`]; the process currently running
//! the controller subscribes and executes. The transport guarantee is
//! deliberately weak: **at-most-once, unordered across publishers**, no
//! acknowledgment. Control actions here are non-critical; publishers that
//! need confirmation poll the status record or trace their send's
//! `correlation_id` through the owning process's logs.
//!
//! # Wire Format
//!
//! Commands are JSON-encodable for broker transports:
//!
//! ```json
//! {"action": "reinit"}
//! {"action": "logout"}
//! {"action": "send", "phone": "5551234567", "message": "hi", "correlation_id": "..."}
//! ```
//!
//! [`InProcessBus`] serves the single-process deployment and tests; a
//! broker-backed bus publishing on
//! [`CoordinatorConfig::command_channel`](crate::CoordinatorConfig) slots in
//! behind the same trait.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Buffered commands per subscriber before old entries are dropped.
///
/// Dropping under lag is acceptable under the at-most-once guarantee.
const BUS_CAPACITY: usize = 64;

// ============================================================================
// Command
// ============================================================================

/// Control command published by any process.
///
/// Transient: exists only on the bus, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Command {
    /// Tear down the session, discard credentials, and pair from scratch.
    Reinit,

    /// Sign the session out without restarting it.
    Logout,

    /// Deliver one message through the live session.
    Send {
        /// Destination phone number (raw; normalized by the dispatcher).
        phone: String,
        /// Message body.
        message: String,
        /// Optional correlation id echoed into the owning process's logs,
        /// letting fire-and-forget publishers trace the outcome.
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<Uuid>,
    },
}

impl Command {
    /// Creates a send command with a fresh correlation id.
    #[must_use]
    pub fn send(phone: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Send {
            phone: phone.into(),
            message: message.into(),
            correlation_id: Some(Uuid::new_v4()),
        }
    }
}

// ============================================================================
// CommandStream
// ============================================================================

/// Subscriber half of the bus.
///
/// Lagged entries are skipped silently per the at-most-once guarantee.
pub struct CommandStream {
    rx: broadcast::Receiver<Command>,
}

impl CommandStream {
    /// Receives the next command, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Command> {
        loop {
            match self.rx.recv().await {
                Ok(command) => return Some(command),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Command subscriber lagged, dropping entries");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ============================================================================
// CommandBus
// ============================================================================

/// Pub/sub transport carrying [`Command`] values between processes.
#[async_trait]
pub trait CommandBus: Send + Sync + 'static {
    /// Publishes a command. Succeeds even with no subscriber (the command
    /// is dropped, per at-most-once).
    async fn publish(&self, command: Command) -> Result<()>;

    /// Opens a subscription for the owning process.
    async fn subscribe(&self) -> Result<CommandStream>;
}

// ============================================================================
// InProcessBus
// ============================================================================

/// Broadcast-backed [`CommandBus`] for a single-process deployment.
pub struct InProcessBus {
    tx: broadcast::Sender<Command>,
}

impl InProcessBus {
    /// Creates a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Number of live subscribers.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandBus for InProcessBus {
    async fn publish(&self, command: Command) -> Result<()> {
        // A send error only means no subscriber is listening.
        let _ = self.tx.send(command);
        Ok(())
    }

    async fn subscribe(&self) -> Result<CommandStream> {
        Ok(CommandStream {
            rx: self.tx.subscribe(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
