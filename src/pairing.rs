//! Pairing handshake: single-use, TTL-bounded tokens and the wait operation.
//!
//! The first caller that needs to display a QR code calls
//! [`PairingHandshake::wait_for_pairing`]. It resolves with the token once
//! the controller enters `PairingPending`, with `None` if the session
//! connects first (no pairing needed) or the timeout fires, and with an
//! error if initialization itself failed.
//!
//! Every resolution path drops the transition subscription, so callers that
//! poll repeatedly never accumulate listeners.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::{SessionController, SessionState, Transition};

// ============================================================================
// PairingToken
// ============================================================================

/// Single-use pairing token (QR payload) with a bounded lifetime.
///
/// At most one valid token exists at a time: a token is invalidated on
/// `Authenticated`, on TTL expiry, or when a fresh `PairingPending` entry
/// supersedes it.
#[derive(Debug, Clone)]
pub struct PairingToken {
    payload: String,
    issued_at: Instant,
    ttl: Duration,
}

impl PairingToken {
    /// Creates a token issued now.
    #[must_use]
    pub fn new(payload: impl Into<String>, ttl: Duration) -> Self {
        Self {
            payload: payload.into(),
            issued_at: Instant::now(),
            ttl,
        }
    }

    /// The opaque QR payload to render.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Instant the token was issued.
    #[inline]
    #[must_use]
    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// Configured lifetime.
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns `true` once the TTL has elapsed.
    #[inline]
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.issued_at.elapsed() >= self.ttl
    }
}

// ============================================================================
// PairingHandshake
// ============================================================================

/// Wait-with-timeout access to the controller's pairing token.
pub struct PairingHandshake {
    controller: SessionController,
}

impl PairingHandshake {
    /// Creates a handshake view over `controller`.
    #[inline]
    #[must_use]
    pub fn new(controller: SessionController) -> Self {
        Self { controller }
    }

    /// Waits up to `timeout` for a pairing token.
    ///
    /// Resolution:
    /// - already `Connected` → `Ok(None)` immediately, no subscription;
    /// - a valid token is already issued → `Ok(Some(token))`;
    /// - `PairingPending` entered while waiting → `Ok(Some(token))`;
    /// - `Connected` entered before a token arrived → `Ok(None)`;
    /// - timeout → `Ok(None)`;
    /// - authentication or initialization failure → `Err`.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthenticationFailed`] if pairing was rejected
    /// - [`Error::Backend`] if initialization failed
    /// - [`Error::ControllerClosed`] if the controller was destroyed
    pub async fn wait_for_pairing(&self, timeout: Duration) -> Result<Option<PairingToken>> {
        // Fast path: no pairing needed, and no listener registered.
        if self.controller.is_ready() {
            return Ok(None);
        }

        // Subscribe before re-reading the snapshot so a transition between
        // the two reads cannot be missed.
        let mut transitions = self.controller.subscribe();

        if let Some(token) = self.controller.pairing_token()
            && !token.is_expired()
        {
            return Ok(Some(token));
        }
        if self.controller.is_ready() {
            return Ok(None);
        }
        match self.controller.state() {
            SessionState::AuthFailed => {
                return Err(Error::authentication_failed("pairing rejected"));
            }
            SessionState::Destroyed => return Err(Error::ControllerClosed),
            _ => {}
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(timeout_ms = timeout.as_millis() as u64, "Pairing wait timed out");
                return Ok(None);
            }

            match tokio::time::timeout(remaining, transitions.recv()).await {
                Err(_) => {
                    debug!(timeout_ms = timeout.as_millis() as u64, "Pairing wait timed out");
                    return Ok(None);
                }
                Ok(Ok(transition)) => {
                    if let Some(resolution) = Self::classify(transition) {
                        return resolution;
                    }
                }
                Ok(Err(RecvError::Lagged(_))) => {
                    // Missed transitions; fall back to the snapshot.
                    if self.controller.is_ready() {
                        return Ok(None);
                    }
                    if let Some(token) = self.controller.pairing_token()
                        && !token.is_expired()
                    {
                        return Ok(Some(token));
                    }
                }
                Ok(Err(RecvError::Closed)) => return Err(Error::ControllerClosed),
            }
        }
    }

    /// Maps a transition onto a wait resolution, or `None` to keep waiting.
    fn classify(transition: Transition) -> Option<Result<Option<PairingToken>>> {
        match transition.to {
            SessionState::PairingPending => transition.token.map(|t| Ok(Some(t))),
            SessionState::Connected => Some(Ok(None)),
            SessionState::AuthFailed => Some(Err(Error::authentication_failed(
                transition.error.unwrap_or_else(|| "pairing rejected".to_string()),
            ))),
            SessionState::Destroyed => Some(Err(Error::ControllerClosed)),
            // An initialize failure lands back in Uninitialized with the
            // error attached.
            SessionState::Uninitialized => transition.error.map(|e| Err(Error::backend(e))),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
