//! Session lifecycle states and transition notifications.
//!
//! Exactly one [`SessionState`] holds at any instant for the singleton
//! session. It is mutated only by the controller actor's serialized
//! transition function and observed everywhere else, either through the
//! status record or through the [`Transition`] broadcast.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pairing::PairingToken;

// ============================================================================
// SessionState
// ============================================================================

/// Lifecycle state of the singleton chat session.
///
/// # Transitions
///
/// | From | Trigger | To |
/// |------|---------|----|
/// | `Uninitialized` | `initialize()` | `PairingPending` |
/// | `PairingPending` | credentials accepted | `Authenticated` |
/// | `Authenticated` | backend ready | `Connected` |
/// | `Connected` | loss, reason ≠ `"logout"` | `Disconnected` |
/// | `Connected` | loss, reason = `"logout"` | `Uninitialized` |
/// | `PairingPending` | auth failure | `AuthFailed` |
/// | `Disconnected` | retries exhausted | `MaxRetriesExceeded` |
/// | any | `destroy()` | `Destroyed` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No live resource; nothing has been started yet.
    Uninitialized,
    /// The backend issued a pairing token and is waiting for the scan.
    PairingPending,
    /// Credentials accepted; the session is coming up.
    Authenticated,
    /// The session is live and can carry messages.
    Connected,
    /// The session was lost; a reconnect attempt is scheduled.
    Disconnected,
    /// Pairing or credential validation failed. Terminal until `reinitialize()`.
    AuthFailed,
    /// Automatic reconnects exhausted. Terminal until `reinitialize()`.
    MaxRetriesExceeded,
    /// The coordinator was torn down; the actor has exited.
    Destroyed,
}

impl SessionState {
    /// Returns the snake_case wire name of the state.
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::PairingPending => "pairing_pending",
            Self::Authenticated => "authenticated",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::AuthFailed => "auth_failed",
            Self::MaxRetriesExceeded => "max_retries_exceeded",
            Self::Destroyed => "destroyed",
        }
    }

    /// Returns `true` if the session is live.
    #[inline]
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if no automatic recovery will run from this state.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::AuthFailed | Self::MaxRetriesExceeded | Self::Destroyed
        )
    }

    /// Returns `true` if an initialize is already underway or complete.
    ///
    /// Used as the idempotency guard: `initialize()` in one of these states
    /// must not create a second underlying resource.
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::PairingPending | Self::Authenticated | Self::Connected
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Transition
// ============================================================================

/// Notification broadcast on every state change.
///
/// Observers (the pairing handshake, dashboards, tests) subscribe to the
/// controller's transition channel instead of raw backend events.
#[derive(Debug, Clone)]
pub struct Transition {
    /// State before the change.
    pub from: SessionState,
    /// State after the change.
    pub to: SessionState,
    /// Pairing token issued with this transition, if any.
    pub token: Option<PairingToken>,
    /// Failure detail when the transition was caused by an error.
    pub error: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
