//! Coordinator configuration.
//!
//! [`CoordinatorConfig`] carries every tunable of the coordinator: the
//! enablement flag, phone normalization, the reconnect/backoff policy,
//! pairing token TTL, timer intervals, and the broker names used by
//! distributed bus/store implementations.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use chat_coordinator::CoordinatorConfig;
//!
//! let config = CoordinatorConfig::default()
//!     .with_country_code("44")
//!     .with_max_attempts(3)
//!     .with_pairing_ttl(Duration::from_secs(90));
//!
//! assert!(config.validate().is_ok());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Defaults
// ============================================================================

/// Default country code prepended to bare 10-digit numbers.
const DEFAULT_COUNTRY_CODE: &str = "1";

/// Default base delay for the exponential backoff schedule.
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default cap on the backoff delay.
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Default number of automatic reconnect attempts.
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default TTL for a pairing token (QR payload).
const DEFAULT_PAIRING_TTL: Duration = Duration::from_secs(60);

/// Default quiesce interval between teardown and rebuild in `reinitialize()`.
const DEFAULT_QUIESCE: Duration = Duration::from_secs(2);

/// Default keep-alive probe interval.
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on `destroy()` / `reinitialize()` acknowledgment waits.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pub/sub channel name for the command bus.
const DEFAULT_COMMAND_CHANNEL: &str = "chat:session:commands";

/// Default key under which the status record is published.
const DEFAULT_STATUS_KEY: &str = "chat:session:status";

// ============================================================================
// CoordinatorConfig
// ============================================================================

/// Configuration for the session coordinator.
///
/// Construct with [`CoordinatorConfig::default()`] and adjust via the
/// `with_*` setters. [`validate()`](Self::validate) is called by
/// `SessionController::spawn`, so invalid configurations fail fast.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Enablement flag. When `false` the coordinator never starts:
    /// `initialize()` and the command subscriber are no-ops.
    pub enabled: bool,

    /// Country code prepended to bare 10-digit destination numbers.
    pub country_code: String,

    /// Base delay of the exponential backoff schedule.
    pub backoff_base: Duration,

    /// Upper bound on any single backoff delay.
    pub backoff_cap: Duration,

    /// Automatic reconnect attempts before `MaxRetriesExceeded`.
    pub max_attempts: u32,

    /// Lifetime of a pairing token.
    pub pairing_ttl: Duration,

    /// Pause between teardown and rebuild during `reinitialize()`.
    pub quiesce: Duration,

    /// Interval of the keep-alive liveness probe.
    pub keepalive_interval: Duration,

    /// Bound on acknowledged control operations (`destroy`, `reinitialize`).
    pub shutdown_timeout: Duration,

    /// Pub/sub channel name used by broker-backed command buses.
    pub command_channel: String,

    /// Key under which broker-backed status stores publish the record.
    pub status_key: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            pairing_ttl: DEFAULT_PAIRING_TTL,
            quiesce: DEFAULT_QUIESCE,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            command_channel: DEFAULT_COMMAND_CHANNEL.to_string(),
            status_key: DEFAULT_STATUS_KEY.to_string(),
        }
    }
}

// ============================================================================
// CoordinatorConfig - Setters
// ============================================================================

impl CoordinatorConfig {
    /// Sets the enablement flag.
    #[inline]
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the default country code.
    #[inline]
    #[must_use]
    pub fn with_country_code(mut self, code: impl Into<String>) -> Self {
        self.country_code = code.into();
        self
    }

    /// Sets the backoff base delay.
    #[inline]
    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Sets the backoff delay cap.
    #[inline]
    #[must_use]
    pub fn with_backoff_cap(mut self, cap: Duration) -> Self {
        self.backoff_cap = cap;
        self
    }

    /// Sets the maximum number of automatic reconnect attempts.
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the pairing token TTL.
    #[inline]
    #[must_use]
    pub fn with_pairing_ttl(mut self, ttl: Duration) -> Self {
        self.pairing_ttl = ttl;
        self
    }

    /// Sets the reinitialize quiesce interval.
    #[inline]
    #[must_use]
    pub fn with_quiesce(mut self, quiesce: Duration) -> Self {
        self.quiesce = quiesce;
        self
    }

    /// Sets the keep-alive probe interval.
    #[inline]
    #[must_use]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    #[inline]
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the command bus channel name.
    #[inline]
    #[must_use]
    pub fn with_command_channel(mut self, channel: impl Into<String>) -> Self {
        self.command_channel = channel.into();
        self
    }

    /// Sets the status record key.
    #[inline]
    #[must_use]
    pub fn with_status_key(mut self, key: impl Into<String>) -> Self {
        self.status_key = key.into();
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl CoordinatorConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the country code is empty or not all digits
    /// - [`Error::Config`] if `max_attempts` is zero
    /// - [`Error::Config`] if `backoff_base` is zero or exceeds `backoff_cap`
    /// - [`Error::Config`] if `keepalive_interval` is zero
    pub fn validate(&self) -> Result<()> {
        if self.country_code.is_empty() || !self.country_code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::config(format!(
                "country code must be non-empty digits, got {:?}",
                self.country_code
            )));
        }

        if self.max_attempts == 0 {
            return Err(Error::config("max_attempts must be at least 1"));
        }

        if self.backoff_base.is_zero() {
            return Err(Error::config("backoff_base must be non-zero"));
        }

        if self.backoff_base > self.backoff_cap {
            return Err(Error::config(format!(
                "backoff_base ({:?}) exceeds backoff_cap ({:?})",
                self.backoff_base, self.backoff_cap
            )));
        }

        if self.keepalive_interval.is_zero() {
            return Err(Error::config("keepalive_interval must be non-zero"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
