//! Shared status record readable by every process.
//!
//! The [`StatusStore`] is the read-only window onto the coordinator: any
//! process can answer "is the session ready?" without owning the resource
//! and without a round-trip over the command bus. The owning process writes
//! the record on every transition; readers may observe a record slightly
//! behind the true state due to propagation delay.
//!
//! The pairing payload lives under its own short-TTL key, separate from the
//! status record, so a dashboard can render the QR without holding stale
//! payloads once the token expires.
//!
//! [`MemoryStatusStore`] covers the single-process deployment and tests; a
//! broker-backed implementation (keyed by
//! [`CoordinatorConfig::status_key`](crate::CoordinatorConfig)) slots in
//! behind the same trait.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::Result;
use crate::session::SessionState;

// ============================================================================
// StatusRecord
// ============================================================================

/// Snapshot of coordinator state visible to all processes.
///
/// Lifecycle: created on the first transition, updated on every transition,
/// removed on `Destroyed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Whether the session is live.
    pub connected: bool,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Whether a valid pairing token is currently available.
    pub pairing_available: bool,
    /// Reconnect attempts made since the last successful connection.
    pub retry_attempt: u32,
    /// Unix milliseconds of the last transition.
    pub last_updated: u64,
}

impl StatusRecord {
    /// Builds a record for `state` stamped with the current wall clock.
    #[must_use]
    pub fn now(state: SessionState, pairing_available: bool, retry_attempt: u32) -> Self {
        Self {
            connected: state.is_connected(),
            state,
            pairing_available,
            retry_attempt,
            last_updated: unix_millis(),
        }
    }
}

/// Current wall clock as unix milliseconds.
fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// StatusStore
// ============================================================================

/// Cross-process store for the status record and pairing payload.
///
/// Store failures must never take down the state machine; the controller
/// logs them and carries on.
#[async_trait]
pub trait StatusStore: Send + Sync + 'static {
    /// Writes the status record.
    async fn put(&self, record: &StatusRecord) -> Result<()>;

    /// Reads the current status record, if any.
    async fn get(&self) -> Result<Option<StatusRecord>>;

    /// Removes the status record. Called on `Destroyed`.
    async fn remove(&self) -> Result<()>;

    /// Stores the pairing payload under the short-TTL key.
    async fn put_pairing_token(&self, payload: &str, ttl: Duration) -> Result<()>;

    /// Reads the pairing payload if it has not expired.
    async fn pairing_payload(&self) -> Result<Option<String>>;

    /// Invalidates the pairing payload.
    async fn clear_pairing_token(&self) -> Result<()>;
}

// ============================================================================
// MemoryStatusStore
// ============================================================================

/// In-memory [`StatusStore`] for single-process deployments and tests.
#[derive(Default)]
pub struct MemoryStatusStore {
    record: Mutex<Option<StatusRecord>>,
    pairing: Mutex<Option<(String, Instant)>>,
}

impl MemoryStatusStore {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn put(&self, record: &StatusRecord) -> Result<()> {
        *self.record.lock() = Some(record.clone());
        Ok(())
    }

    async fn get(&self) -> Result<Option<StatusRecord>> {
        Ok(self.record.lock().clone())
    }

    async fn remove(&self) -> Result<()> {
        *self.record.lock() = None;
        *self.pairing.lock() = None;
        Ok(())
    }

    async fn put_pairing_token(&self, payload: &str, ttl: Duration) -> Result<()> {
        let expires = Instant::now() + ttl;
        *self.pairing.lock() = Some((payload.to_string(), expires));
        Ok(())
    }

    async fn pairing_payload(&self) -> Result<Option<String>> {
        let mut guard = self.pairing.lock();
        match guard.as_ref() {
            Some((payload, expires)) if *expires > Instant::now() => Ok(Some(payload.clone())),
            Some(_) => {
                // Lazy expiry on read.
                *guard = None;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn clear_pairing_token(&self) -> Result<()> {
        *self.pairing.lock() = None;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
