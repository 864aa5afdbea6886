//! Message dispatch: destination normalization and the delivery chain.
//!
//! The dispatcher runs inside the owning process against the controller's
//! backend. It never touches the network unless the controller reports
//! `Connected`.
//!
//! # Delivery Chain
//!
//! 1. normalize the destination number;
//! 2. check recipient registration on the target network;
//! 3. look up an existing conversation by normalized id; on miss, resolve
//!    the canonical id and retry the lookup once;
//! 4. if a conversation context exists, clear stale composing/typing state
//!    before sending (avoids inconsistent UI state on the remote end);
//!    otherwise send directly by id;
//! 5. return the provider receipt.

// ============================================================================
// Imports
// ============================================================================

use tracing::{debug, trace};

use crate::backend::{ChatBackend, SendReceipt};
use crate::error::{Error, Result};
use crate::session::SessionState;

// ============================================================================
// Normalization
// ============================================================================

/// Length at which a bare national number gets the default country code.
const NATIONAL_NUMBER_LEN: usize = 10;

/// Normalizes a destination phone number.
///
/// Strips every non-digit character (including any leading `+`); a result of
/// exactly 10 digits gets `country_code` prepended. Idempotent: feeding the
/// output back in returns it unchanged.
///
/// # Errors
///
/// Returns [`Error::InvalidPhone`] if `raw` contains no digits.
pub fn normalize_phone(raw: &str, country_code: &str) -> Result<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    if digits.is_empty() {
        return Err(Error::invalid_phone(raw));
    }

    if digits.len() == NATIONAL_NUMBER_LEN {
        Ok(format!("{country_code}{digits}"))
    } else {
        Ok(digits)
    }
}

// ============================================================================
// MessageDispatcher
// ============================================================================

/// Delivers one message through a connected backend.
pub struct MessageDispatcher {
    country_code: String,
}

impl MessageDispatcher {
    /// Creates a dispatcher using `country_code` for bare national numbers.
    #[inline]
    #[must_use]
    pub fn new(country_code: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
        }
    }

    /// Runs the delivery chain for one message.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] if `state` is not `Connected` (no network call
    ///   is made)
    /// - [`Error::InvalidPhone`] if the destination cannot be normalized
    /// - [`Error::UnregisteredRecipient`] if the destination is absent from
    ///   the target network
    /// - [`Error::Backend`] if the provider rejects the send
    pub async fn dispatch(
        &self,
        backend: &dyn ChatBackend,
        state: SessionState,
        phone: &str,
        message: &str,
    ) -> Result<SendReceipt> {
        if !state.is_connected() {
            return Err(Error::not_ready(state));
        }

        let chat_id = normalize_phone(phone, &self.country_code)?;
        trace!(chat_id = %chat_id, "Destination normalized");

        if !backend.is_registered(&chat_id).await? {
            return Err(Error::unregistered_recipient(chat_id));
        }

        let (target, has_conversation) = self.resolve_target(backend, chat_id).await;

        if has_conversation
            && let Err(e) = backend.clear_composing(&target).await
        {
            // Stale typing state is cosmetic; never fail the send over it.
            debug!(error = %e, chat_id = %target, "Failed to clear composing state");
        }

        let receipt = backend.send_message(&target, message).await?;
        debug!(
            chat_id = %target,
            message_id = %receipt.message_id,
            "Message delivered"
        );

        Ok(receipt)
    }

    /// Resolution fallback chain: direct lookup, then canonical id, then
    /// direct send by id.
    async fn resolve_target(
        &self,
        backend: &dyn ChatBackend,
        chat_id: String,
    ) -> (String, bool) {
        match backend.has_conversation(&chat_id).await {
            Ok(true) => (chat_id, true),
            _ => {
                let canonical = match backend.resolve_chat_id(&chat_id).await {
                    Ok(canonical) => {
                        if canonical != chat_id {
                            debug!(from = %chat_id, to = %canonical, "Resolved canonical chat id");
                        }
                        canonical
                    }
                    Err(e) => {
                        debug!(error = %e, chat_id = %chat_id, "Canonical lookup failed");
                        chat_id
                    }
                };

                let found = backend.has_conversation(&canonical).await.unwrap_or(false);
                (canonical, found)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
