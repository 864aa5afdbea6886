//! Error types for the session coordinator.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use chat_coordinator::{Result, Error};
//!
//! async fn example(controller: &SessionController) -> Result<()> {
//!     let receipt = controller.send("5551234567", "hello").await?;
//!     println!("delivered as {}", receipt.message_id);
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::Disabled`] |
//! | Session lifecycle | [`Error::AuthenticationFailed`], [`Error::TransientDisconnect`], [`Error::MaxRetriesExceeded`] |
//! | Dispatch | [`Error::NotReady`], [`Error::UnregisteredRecipient`], [`Error::InvalidPhone`] |
//! | External | [`Error::Backend`], [`Error::Bus`], [`Error::Json`] |
//! | Coordination | [`Error::ControllerClosed`], [`Error::Timeout`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

use crate::session::SessionState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when coordinator configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Coordinator is disabled by configuration.
    ///
    /// Returned when an operation requires a running coordinator but the
    /// enablement flag is off.
    #[error("Coordinator is disabled")]
    Disabled,

    // ========================================================================
    // Session Lifecycle Errors
    // ========================================================================
    /// Authentication failed during the pairing handshake.
    ///
    /// Terminal: requires a fresh pairing via `reinitialize()`.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Failure detail reported by the backend.
        message: String,
    },

    /// The live session was lost for a retryable reason.
    ///
    /// Recovery is driven by the reconnect/backoff policy.
    #[error("Session disconnected: {reason}")]
    TransientDisconnect {
        /// Disconnect reason reported by the backend.
        reason: String,
    },

    /// All automatic reconnect attempts have been exhausted.
    ///
    /// Terminal: requires an explicit `reinitialize()`.
    #[error("Reconnect attempts exhausted after {attempts} tries")]
    MaxRetriesExceeded {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    // ========================================================================
    // Dispatch Errors
    // ========================================================================
    /// A command requiring a live session arrived while not connected.
    ///
    /// Retryable: the caller may re-issue once the status record reports
    /// `connected`.
    #[error("Session not ready (state: {state})")]
    NotReady {
        /// State the controller was in when the command arrived.
        state: SessionState,
    },

    /// The destination is not registered on the target network.
    #[error("Recipient not registered: {chat_id}")]
    UnregisteredRecipient {
        /// Normalized chat id that failed the registration check.
        chat_id: String,
    },

    /// The destination phone number could not be normalized.
    #[error("Invalid phone number: {phone:?}")]
    InvalidPhone {
        /// Raw input that produced no digits.
        phone: String,
    },

    // ========================================================================
    // Coordination Errors
    // ========================================================================
    /// The controller actor has terminated.
    ///
    /// Returned when a handle call races with `destroy()`.
    #[error("Controller closed")]
    ControllerClosed,

    /// Operation timeout.
    ///
    /// Returned when an operation exceeds its timeout duration.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// Failure reported by the underlying messaging backend.
    #[error("Backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },

    /// Command bus transport failure.
    #[error("Bus error: {message}")]
    Bus {
        /// Description of the transport failure.
        message: String,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an authentication failure.
    #[inline]
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Creates a transient disconnect error.
    #[inline]
    pub fn transient_disconnect(reason: impl Into<String>) -> Self {
        Self::TransientDisconnect {
            reason: reason.into(),
        }
    }

    /// Creates a max-retries-exceeded error.
    #[inline]
    pub fn max_retries_exceeded(attempts: u32) -> Self {
        Self::MaxRetriesExceeded { attempts }
    }

    /// Creates a not-ready error for the given state.
    #[inline]
    pub fn not_ready(state: SessionState) -> Self {
        Self::NotReady { state }
    }

    /// Creates an unregistered-recipient error.
    #[inline]
    pub fn unregistered_recipient(chat_id: impl Into<String>) -> Self {
        Self::UnregisteredRecipient {
            chat_id: chat_id.into(),
        }
    }

    /// Creates an invalid-phone error.
    #[inline]
    pub fn invalid_phone(phone: impl Into<String>) -> Self {
        Self::InvalidPhone {
            phone: phone.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a backend error.
    #[inline]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a bus transport error.
    #[inline]
    pub fn bus(message: impl Into<String>) -> Self {
        Self::Bus {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the operation may succeed on retry.
    ///
    /// Retryable errors resolve on their own once the controller regains a
    /// live connection; callers should poll the status record rather than
    /// block on the internal retry loop.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotReady { .. } | Self::TransientDisconnect { .. } | Self::Timeout { .. }
        )
    }

    /// Returns `true` if this error is terminal.
    ///
    /// Terminal errors require an explicit `reinitialize()` (fresh pairing)
    /// before the session can recover.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::MaxRetriesExceeded { .. }
        )
    }

    /// Returns `true` if this is a dispatch (send-path) error.
    #[inline]
    #[must_use]
    pub fn is_dispatch_error(&self) -> bool {
        matches!(
            self,
            Self::NotReady { .. } | Self::UnregisteredRecipient { .. } | Self::InvalidPhone { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_ready(SessionState::Disconnected);
        assert_eq!(err.to_string(), "Session not ready (state: disconnected)");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("country code must be digits");
        assert_eq!(
            err.to_string(),
            "Configuration error: country code must be digits"
        );
    }

    #[test]
    fn test_max_retries_display() {
        let err = Error::max_retries_exceeded(5);
        assert_eq!(err.to_string(), "Reconnect attempts exhausted after 5 tries");
    }

    #[test]
    fn test_is_retryable() {
        let not_ready = Error::not_ready(SessionState::PairingPending);
        let disconnect = Error::transient_disconnect("navigation");
        let auth = Error::authentication_failed("bad credentials");

        assert!(not_ready.is_retryable());
        assert!(disconnect.is_retryable());
        assert!(!auth.is_retryable());
    }

    #[test]
    fn test_is_terminal() {
        let auth = Error::authentication_failed("bad credentials");
        let exhausted = Error::max_retries_exceeded(5);
        let not_ready = Error::not_ready(SessionState::Disconnected);

        assert!(auth.is_terminal());
        assert!(exhausted.is_terminal());
        assert!(!not_ready.is_terminal());
    }

    #[test]
    fn test_is_dispatch_error() {
        assert!(Error::unregistered_recipient("15551234567").is_dispatch_error());
        assert!(Error::invalid_phone("---").is_dispatch_error());
        assert!(!Error::Disabled.is_dispatch_error());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
