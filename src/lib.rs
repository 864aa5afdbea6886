//! Chat Coordinator - Cross-process session coordination for a singleton
//! web-messaging session.
//!
//! One browser-automated messaging session exists per deployment, but several
//! processes want to drive it: initialize it, send messages through it, check
//! whether it is up, or force a fresh pairing. This library coordinates that
//! contention.
//!
//! # Architecture
//!
//! Exactly one process owns the live session at a time:
//!
//! - **Owning process**: runs the [`SessionController`] actor, which holds
//!   the only reference to the [`ChatBackend`] and serializes every state
//!   transition
//! - **Other processes**: publish [`Command`]s on the [`CommandBus`] and read
//!   the [`StatusRecord`] from the [`StatusStore`]; they never touch the
//!   backend directly
//!
//! Key design principles:
//!
//! - Single serialized transition point (actor loop, no shared locks on the
//!   state machine)
//! - Exponential-backoff reconnect with a hard attempt cap
//! - Single-use, TTL-bounded pairing tokens
//! - At-most-once command delivery; confirmation via status reads
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use chat_coordinator::{
//!     ChatBackend, CoordinatorConfig, InProcessBus, MemoryStatusStore,
//!     PairingHandshake, Result, SessionController,
//! };
//!
//! async fn run(backend: Arc<dyn ChatBackend>) -> Result<()> {
//!     let bus = Arc::new(InProcessBus::new());
//!     let store = Arc::new(MemoryStatusStore::new());
//!
//!     let controller = SessionController::spawn(
//!         backend,
//!         bus,
//!         store,
//!         CoordinatorConfig::default(),
//!     )
//!     .await?;
//!     controller.initialize()?;
//!
//!     // First boot: render the QR code if pairing is required.
//!     let handshake = PairingHandshake::new(controller.clone());
//!     if let Some(token) = handshake.wait_for_pairing(Duration::from_secs(60)).await? {
//!         println!("scan to pair: {}", token.payload());
//!     }
//!
//!     let receipt = controller.send("5551234567", "hello").await?;
//!     println!("delivered as {}", receipt.message_id);
//!
//!     controller.destroy().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backend`] | [`ChatBackend`] trait: the messaging-engine seam |
//! | [`bus`] | Cross-process command bus (pub/sub) |
//! | [`config`] | [`CoordinatorConfig`] and validation |
//! | [`dispatch`] | Phone normalization and the message delivery chain |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`pairing`] | Pairing tokens and the wait-for-pairing handshake |
//! | [`session`] | The controller actor, lifecycle states, retry policy |
//! | [`status`] | Shared status record readable by every process |

// ============================================================================
// Modules
// ============================================================================

/// Messaging-engine seam.
///
/// The coordinator never speaks the wire protocol itself; it drives a
/// [`ChatBackend`] and reacts to the [`BackendEvent`]s it pushes.
pub mod backend;

/// Cross-process command bus.
///
/// At-most-once pub/sub carrying [`Command`] values to the owning process.
pub mod bus;

/// Coordinator configuration.
pub mod config;

/// Message dispatch: destination normalization and the delivery chain.
pub mod dispatch;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Pairing handshake and single-use tokens.
pub mod pairing;

/// Session lifecycle: controller actor, states, retry policy.
pub mod session;

/// Shared status record and its store.
pub mod status;

// ============================================================================
// Re-exports
// ============================================================================

// Backend seam
pub use backend::{BackendEvent, ChatBackend, SendReceipt};

// Command bus
pub use bus::{Command, CommandBus, CommandStream, InProcessBus};

// Configuration
pub use config::CoordinatorConfig;

// Dispatch
pub use dispatch::{normalize_phone, MessageDispatcher};

// Error types
pub use error::{Error, Result};

// Pairing
pub use pairing::{PairingHandshake, PairingToken};

// Session lifecycle
pub use session::{RetryPolicy, RetryState, SessionController, SessionState, Transition};

// Status
pub use status::{MemoryStatusStore, StatusRecord, StatusStore};
