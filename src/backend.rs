//! Backend trait for the underlying messaging engine.
//!
//! The browser-automation engine that speaks the actual wire protocol is an
//! external collaborator. This module defines the seam the coordinator talks
//! through: a [`ChatBackend`] owns the live connection primitives, pushes
//! [`BackendEvent`]s into the controller, and executes message operations.
//!
//! The live backend handle is owned exclusively by the `SessionController`
//! actor; no other component or process holds a reference to it.
//!
//! # Event Flow
//!
//! ```text
//! ChatBackend::start(events_tx)
//!     │
//!     ├─ PairingCodeIssued ──► SessionState::PairingPending
//!     ├─ Authenticated ──────► SessionState::Authenticated
//!     ├─ Ready ──────────────► SessionState::Connected
//!     ├─ AuthFailed ─────────► SessionState::AuthFailed
//!     └─ Disconnected ───────► SessionState::Disconnected / Uninitialized
//! ```

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

// ============================================================================
// BackendEvent
// ============================================================================

/// Lifecycle notification pushed by the backend into the controller.
///
/// Events from a single backend are delivered in the order the backend
/// emits them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// The backend needs a pairing step; carries the QR payload to display.
    PairingCodeIssued {
        /// Opaque single-use pairing payload.
        payload: String,
    },

    /// Persisted or freshly scanned credentials were accepted.
    Authenticated,

    /// The session is fully up and can carry messages.
    Ready,

    /// The pairing or credential check failed outright.
    AuthFailed {
        /// Failure detail from the backend.
        message: String,
    },

    /// The live session was lost.
    ///
    /// A reason of `"logout"` means the account was signed out remotely and
    /// no automatic reconnect should run.
    Disconnected {
        /// Backend-reported disconnect reason.
        reason: String,
    },
}

// ============================================================================
// SendReceipt
// ============================================================================

/// Provider acknowledgment for a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Provider-assigned message id.
    pub message_id: String,
    /// Provider timestamp (unix milliseconds).
    pub timestamp: u64,
}

// ============================================================================
// ChatBackend
// ============================================================================

/// The underlying messaging engine, behind a trait seam.
///
/// `start`/`stop`/`logout` manage the live resource and the opaque
/// credential blob the engine persists on its own. The remaining methods are
/// only meaningful while the session is connected; implementations should
/// return [`Error::Backend`](crate::Error::Backend) otherwise.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// Brings up the live session.
    ///
    /// Lifecycle progress is reported through `events`; with persisted
    /// credentials the backend may skip straight to [`BackendEvent::Ready`]
    /// without issuing a pairing code. `start` returns once the bring-up has
    /// been initiated, not once the session is ready.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine could not be launched at all.
    async fn start(&self, events: mpsc::UnboundedSender<BackendEvent>) -> Result<()>;

    /// Tears down the live session, releasing the underlying resource.
    ///
    /// Idempotent: stopping an already-stopped backend is not an error.
    async fn stop(&self) -> Result<()>;

    /// Discards the persisted credential blob.
    ///
    /// The next `start` will require a fresh pairing handshake.
    async fn logout(&self) -> Result<()>;

    /// Liveness probe for the keep-alive check.
    async fn is_alive(&self) -> bool;

    /// Returns whether `chat_id` is registered on the target network.
    async fn is_registered(&self, chat_id: &str) -> Result<bool>;

    /// Returns whether a conversation context exists for `chat_id`.
    async fn has_conversation(&self, chat_id: &str) -> Result<bool>;

    /// Resolves the canonical chat id for a normalized number.
    async fn resolve_chat_id(&self, chat_id: &str) -> Result<String>;

    /// Clears stale composing/typing state in the conversation.
    async fn clear_composing(&self, chat_id: &str) -> Result<()>;

    /// Delivers one message and returns the provider receipt.
    async fn send_message(&self, chat_id: &str, body: &str) -> Result<SendReceipt>;
}

// ============================================================================
// Test Mock
// ============================================================================


// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_event_equality() {
        let a = BackendEvent::Disconnected {
            reason: "logout".to_string(),
        };
        let b = BackendEvent::Disconnected {
            reason: "logout".to_string(),
        };
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_mock_defaults_to_full_connect_sequence() {
        let backend = testing::MockBackend::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        backend.start(tx).await.expect("start");
        assert_eq!(backend.start_calls(), 1);

        let first = rx.recv().await.expect("event");
        assert!(matches!(first, BackendEvent::PairingCodeIssued { .. }));
        assert_eq!(rx.recv().await, Some(BackendEvent::Authenticated));
        assert_eq!(rx.recv().await, Some(BackendEvent::Ready));
    }

    #[tokio::test]
    async fn test_mock_scripted_failure() {
        let backend = testing::MockBackend::new();
        backend.push_start(testing::StartOutcome::Fail("no browser".to_string()));

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let err = backend.start(tx).await.unwrap_err();
        assert!(err.to_string().contains("no browser"));
    }
}
