//! Session controller: the owning actor for the singleton chat session.
//!
//! One actor task holds the live backend privately; every external trigger
//! (backend events, bus commands, handle calls, timers) funnels through the
//! actor's single `tokio::select!` loop, so state transitions are serialized
//! by construction.
//!
//! # Architecture
//!
//! ```text
//! other processes ──publish──► CommandBus ──┐
//!                                           ▼
//! SessionController (handle) ──mpsc──► ControllerActor ──owns──► ChatBackend
//!                                           │
//!                        StatusStore ◄──────┼──────► broadcast<Transition>
//!                        (any process reads)│        (pairing waiters, tests)
//!                                    reconnect timer
//! ```
//!
//! Non-owning callers observe outcomes through the status record or the
//! transition broadcast; they never hold a reference to the backend.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{BackendEvent, ChatBackend, SendReceipt};
use crate::bus::{Command, CommandBus, CommandStream};
use crate::config::CoordinatorConfig;
use crate::dispatch::MessageDispatcher;
use crate::error::{Error, Result};
use crate::pairing::PairingToken;
use crate::status::{StatusRecord, StatusStore};

use super::retry::{RetryPolicy, RetryState};
use super::state::{SessionState, Transition};

// ============================================================================
// Constants
// ============================================================================

/// Buffered transitions per subscriber.
const TRANSITION_CAPACITY: usize = 32;

/// Disconnect reason that suppresses automatic reconnection.
const LOGOUT_REASON: &str = "logout";

// ============================================================================
// Control Messages
// ============================================================================

/// Messages funneled into the actor.
enum ControlMsg {
    /// Start the session if nothing is running yet.
    Initialize,
    /// Full rebuild: teardown, credential discard, quiesce, start.
    Reinitialize {
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    /// Sign out and stop without rebuilding.
    Logout {
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    /// Release everything and terminate the actor.
    Destroy { reply: oneshot::Sender<()> },
    /// Deliver one message. `reply` is `None` for bus-originated sends
    /// (fire-and-forget; outcome goes to the logs).
    Send {
        phone: String,
        message: String,
        correlation_id: Option<Uuid>,
        reply: Option<oneshot::Sender<Result<SendReceipt>>>,
    },
    /// A scheduled reconnect delay has elapsed.
    ReconnectDue,
}

// ============================================================================
// Shared Snapshot
// ============================================================================

/// Snapshot readable from any handle without going through the actor.
struct Shared {
    state: SessionState,
    retry_attempt: u32,
    token: Option<PairingToken>,
}

/// Handle-side shared state.
struct ControllerInner {
    enabled: bool,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    transitions: broadcast::Sender<Transition>,
    shared: Arc<Mutex<Shared>>,
    shutdown_timeout: Duration,
}

// ============================================================================
// SessionController
// ============================================================================

/// Clonable handle to the owning actor.
///
/// Within-process reads (`state`, `is_ready`, `status`) hit the shared
/// snapshot and always reflect the most recent local transition; they never
/// block on the actor.
///
/// # Example
///
/// ```ignore
/// let controller = SessionController::spawn(backend, bus, store, config).await?;
/// controller.initialize()?;
///
/// if controller.is_ready() {
///     let receipt = controller.send("5551234567", "hello").await?;
/// }
///
/// // On process termination:
/// controller.destroy().await?;
/// ```
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    /// Validates `config` and starts the coordinator.
    ///
    /// When `config.enabled` is `false` no actor and no bus subscriber are
    /// started; the returned handle reports `Uninitialized` forever and
    /// rejects message sends with [`Error::Disabled`].
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the configuration is invalid
    /// - [`Error::Bus`] if the command subscription cannot be opened
    pub async fn spawn(
        backend: Arc<dyn ChatBackend>,
        bus: Arc<dyn CommandBus>,
        status: Arc<dyn StatusStore>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let shared = Arc::new(Mutex::new(Shared {
            state: SessionState::Uninitialized,
            retry_attempt: 0,
            token: None,
        }));

        let inner = Arc::new(ControllerInner {
            enabled: config.enabled,
            control_tx: control_tx.clone(),
            transitions: transitions.clone(),
            shared: Arc::clone(&shared),
            shutdown_timeout: config.shutdown_timeout,
        });

        if !config.enabled {
            info!("Session coordinator disabled by configuration");
            return Ok(Self { inner });
        }

        // Subscribe before the actor starts so no command published after
        // spawn() returns can be missed.
        let stream = bus.subscribe().await?;
        let bus_task = tokio::spawn(run_bus_subscriber(stream, control_tx.clone()));

        let (backend_tx, backend_rx) = mpsc::unbounded_channel();
        let retry = RetryState::new(RetryPolicy::new(
            config.backoff_base,
            config.backoff_cap,
            config.max_attempts,
        ));
        let dispatcher = MessageDispatcher::new(config.country_code.clone());

        let actor = ControllerActor {
            backend,
            status,
            dispatcher,
            config,
            shared,
            transitions,
            control_rx,
            control_tx,
            backend_rx,
            backend_tx,
            retry,
            reconnect_timer: None,
            starting: false,
            bus_task: Some(bus_task),
        };
        tokio::spawn(actor.run());

        Ok(Self { inner })
    }
}

// ============================================================================
// SessionController - Observers
// ============================================================================

impl SessionController {
    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.shared.lock().state
    }

    /// Returns `true` if the session is live and can carry messages.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state().is_connected()
    }

    /// Builds a fresh status record from the local snapshot.
    #[must_use]
    pub fn status(&self) -> StatusRecord {
        let shared = self.inner.shared.lock();
        StatusRecord::now(
            shared.state,
            shared.token.as_ref().is_some_and(|t| !t.is_expired()),
            shared.retry_attempt,
        )
    }

    /// The currently issued pairing token, if any (possibly expired).
    #[must_use]
    pub fn pairing_token(&self) -> Option<PairingToken> {
        self.inner.shared.lock().token.clone()
    }

    /// Subscribes to transition notifications.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.inner.transitions.subscribe()
    }

    /// Number of live transition subscribers.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.transitions.receiver_count()
    }
}

// ============================================================================
// SessionController - Lifecycle API
// ============================================================================

impl SessionController {
    /// Requests session start.
    ///
    /// Fire-and-forget: `initialize()` is typically invoked once at process
    /// startup with no caller left waiting, so failures reset the state to
    /// `Uninitialized` and surface through the transition broadcast and logs
    /// instead of this return value. Idempotent while a start is underway.
    ///
    /// # Errors
    ///
    /// - [`Error::ControllerClosed`] if the coordinator was destroyed
    pub fn initialize(&self) -> Result<()> {
        if !self.inner.enabled {
            info!("initialize() ignored: coordinator disabled");
            return Ok(());
        }
        self.inner
            .control_tx
            .send(ControlMsg::Initialize)
            .map_err(|_| Error::ControllerClosed)
    }

    /// Destructive full rebuild: teardown, discard credentials, quiesce,
    /// then start again. The "forgot pairing and start over" operator action.
    ///
    /// # Errors
    ///
    /// - [`Error::Disabled`] if the coordinator is disabled
    /// - [`Error::Timeout`] if the rebuild was not acknowledged in time
    /// - [`Error::ControllerClosed`] if the coordinator was destroyed
    pub async fn reinitialize(&self) -> Result<()> {
        if !self.inner.enabled {
            return Err(Error::Disabled);
        }
        let (tx, rx) = oneshot::channel();
        self.inner
            .control_tx
            .send(ControlMsg::Reinitialize { reply: Some(tx) })
            .map_err(|_| Error::ControllerClosed)?;
        self.await_ack("reinitialize", rx).await?
    }

    /// Signs the session out and stops it without rebuilding.
    ///
    /// # Errors
    ///
    /// - [`Error::Disabled`] if the coordinator is disabled
    /// - [`Error::Timeout`] if not acknowledged in time
    /// - [`Error::ControllerClosed`] if the coordinator was destroyed
    pub async fn logout(&self) -> Result<()> {
        if !self.inner.enabled {
            return Err(Error::Disabled);
        }
        let (tx, rx) = oneshot::channel();
        self.inner
            .control_tx
            .send(ControlMsg::Logout { reply: Some(tx) })
            .map_err(|_| Error::ControllerClosed)?;
        self.await_ack("logout", rx).await?
    }

    /// Releases the backend, the bus subscription, and any pending retry,
    /// then terminates the actor. Bounded by the configured shutdown
    /// timeout so a process termination hook can await it directly.
    ///
    /// Idempotent: destroying an already-destroyed coordinator succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if teardown exceeded the shutdown timeout
    pub async fn destroy(&self) -> Result<()> {
        if !self.inner.enabled {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        if self
            .inner
            .control_tx
            .send(ControlMsg::Destroy { reply: tx })
            .is_err()
        {
            // Actor already gone.
            return Ok(());
        }

        match tokio::time::timeout(self.inner.shutdown_timeout, rx).await {
            Ok(_) => Ok(()),
            Err(_) => Err(Error::timeout(
                "destroy",
                self.inner.shutdown_timeout.as_millis() as u64,
            )),
        }
    }

    /// Delivers one message through the live session.
    ///
    /// # Errors
    ///
    /// - [`Error::Disabled`] if the coordinator is disabled
    /// - [`Error::NotReady`] if the session is not connected
    /// - [`Error::InvalidPhone`] / [`Error::UnregisteredRecipient`] /
    ///   [`Error::Backend`] from the dispatch chain
    /// - [`Error::ControllerClosed`] if the coordinator was destroyed
    pub async fn send(&self, phone: &str, message: &str) -> Result<SendReceipt> {
        if !self.inner.enabled {
            return Err(Error::Disabled);
        }
        let (tx, rx) = oneshot::channel();
        self.inner
            .control_tx
            .send(ControlMsg::Send {
                phone: phone.to_string(),
                message: message.to_string(),
                correlation_id: None,
                reply: Some(tx),
            })
            .map_err(|_| Error::ControllerClosed)?;
        rx.await.map_err(|_| Error::ControllerClosed)?
    }

    /// Awaits an acknowledged control operation with the shutdown bound.
    async fn await_ack<T>(
        &self,
        operation: &str,
        rx: oneshot::Receiver<T>,
    ) -> Result<T> {
        match tokio::time::timeout(self.inner.shutdown_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::ControllerClosed),
            Err(_) => Err(Error::timeout(
                operation,
                self.inner.shutdown_timeout.as_millis() as u64,
            )),
        }
    }
}

// ============================================================================
// Bus Subscriber
// ============================================================================

/// Forwards bus commands into the actor until either side goes away.
async fn run_bus_subscriber(
    mut stream: CommandStream,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
) {
    while let Some(command) = stream.recv().await {
        debug!(?command, "Command received from bus");
        let msg = match command {
            Command::Reinit => ControlMsg::Reinitialize { reply: None },
            Command::Logout => ControlMsg::Logout { reply: None },
            Command::Send {
                phone,
                message,
                correlation_id,
            } => ControlMsg::Send {
                phone,
                message,
                correlation_id,
                reply: None,
            },
        };
        if control_tx.send(msg).is_err() {
            break;
        }
    }
    debug!("Bus subscriber terminated");
}

// ============================================================================
// ControllerActor
// ============================================================================

/// The owning task. Holds the only reference to the live backend.
struct ControllerActor {
    backend: Arc<dyn ChatBackend>,
    status: Arc<dyn StatusStore>,
    dispatcher: MessageDispatcher,
    config: CoordinatorConfig,
    shared: Arc<Mutex<Shared>>,
    transitions: broadcast::Sender<Transition>,
    control_rx: mpsc::UnboundedReceiver<ControlMsg>,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    backend_rx: mpsc::UnboundedReceiver<BackendEvent>,
    backend_tx: mpsc::UnboundedSender<BackendEvent>,
    retry: RetryState,
    /// Pending reconnect delay. The in-flight guard: while set, further
    /// disconnects do not schedule a second timer.
    reconnect_timer: Option<JoinHandle<()>>,
    /// Idempotency guard for `initialize()` while bring-up is underway.
    starting: bool,
    bus_task: Option<JoinHandle<()>>,
}

impl ControllerActor {
    /// Event loop: the single serialized transition point.
    async fn run(mut self) {
        let mut keepalive = tokio::time::interval(self.config.keepalive_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Swallow the interval's immediate first tick.
        keepalive.tick().await;

        info!("Session controller started");

        loop {
            tokio::select! {
                msg = self.control_rx.recv() => match msg {
                    Some(msg) => {
                        if self.handle_control(msg).await {
                            break;
                        }
                    }
                    None => {
                        debug!("All controller handles dropped");
                        self.teardown(None).await;
                        break;
                    }
                },

                Some(event) = self.backend_rx.recv() => {
                    self.handle_backend_event(event).await;
                }

                _ = keepalive.tick() => {
                    self.keepalive_probe().await;
                }
            }
        }

        debug!("Controller actor terminated");
    }

    #[inline]
    fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Handles one control message. Returns `true` on shutdown.
    async fn handle_control(&mut self, msg: ControlMsg) -> bool {
        match msg {
            ControlMsg::Initialize => {
                self.handle_initialize().await;
                false
            }

            ControlMsg::Reinitialize { reply } => {
                let result = self.handle_reinitialize().await;
                match reply {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(error = %e, "Bus-issued reinit failed");
                        }
                    }
                }
                false
            }

            ControlMsg::Logout { reply } => {
                let result = self.handle_logout().await;
                match reply {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(error = %e, "Bus-issued logout failed");
                        }
                    }
                }
                false
            }

            ControlMsg::Send {
                phone,
                message,
                correlation_id,
                reply,
            } => {
                let state = self.state();
                let result = self
                    .dispatcher
                    .dispatch(self.backend.as_ref(), state, &phone, &message)
                    .await;

                match reply {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    // Fire-and-forget: the bus gives no reply path, so the
                    // outcome is only visible here.
                    None => match result {
                        Ok(receipt) => info!(
                            ?correlation_id,
                            message_id = %receipt.message_id,
                            "Bus send delivered"
                        ),
                        Err(e) => warn!(?correlation_id, error = %e, "Bus send failed"),
                    },
                }
                false
            }

            ControlMsg::ReconnectDue => {
                self.handle_reconnect_due().await;
                false
            }

            ControlMsg::Destroy { reply } => {
                self.teardown(Some(reply)).await;
                true
            }
        }
    }

    /// Routes a backend lifecycle event through the transition function.
    async fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::PairingCodeIssued { payload } => {
                let token = PairingToken::new(payload, self.config.pairing_ttl);
                self.transition(SessionState::PairingPending, Some(token), None)
                    .await;
            }

            BackendEvent::Authenticated => {
                self.transition(SessionState::Authenticated, None, None).await;
            }

            BackendEvent::Ready => {
                self.starting = false;
                self.cancel_reconnect();
                self.transition(SessionState::Connected, None, None).await;
            }

            BackendEvent::AuthFailed { message } => {
                self.starting = false;
                self.transition(SessionState::AuthFailed, None, Some(message))
                    .await;
            }

            BackendEvent::Disconnected { reason } => {
                self.handle_disconnect(reason).await;
            }
        }
    }

    /// Starts the session unless one is already up or coming up.
    async fn handle_initialize(&mut self) {
        let state = self.state();
        if self.starting || state.is_active() {
            debug!(state = %state, "initialize() skipped: session already active");
            return;
        }
        if state.is_terminal() {
            warn!(state = %state, "initialize() refused in terminal state; use reinitialize()");
            return;
        }

        // A fresh initialize supersedes any pending retry.
        self.cancel_reconnect();
        let _ = self.start_backend().await;
    }

    /// Full rebuild: teardown, credential discard, quiesce, start.
    async fn handle_reinitialize(&mut self) -> Result<()> {
        info!("Reinitializing session from scratch");
        self.cancel_reconnect();
        self.starting = false;

        if let Err(e) = self.backend.stop().await {
            debug!(error = %e, "Backend stop during reinitialize failed");
        }
        if let Err(e) = self.backend.logout().await {
            warn!(error = %e, "Credential discard failed");
        }

        self.retry.reset();
        self.transition(SessionState::Uninitialized, None, None).await;

        // Let the engine release its locks before rebuilding.
        tokio::time::sleep(self.config.quiesce).await;

        self.start_backend().await
    }

    /// Signs out and stops without rebuilding. No automatic reconnect.
    async fn handle_logout(&mut self) -> Result<()> {
        info!("Logging session out");
        self.cancel_reconnect();
        self.starting = false;

        let logout = self.backend.logout().await;
        if let Err(e) = self.backend.stop().await {
            debug!(error = %e, "Backend stop after logout failed");
        }

        self.retry.reset();
        self.transition(SessionState::Uninitialized, None, None).await;
        logout
    }

    /// Applies the logout/transient split to a connection loss.
    async fn handle_disconnect(&mut self, reason: String) {
        self.starting = false;
        let state = self.state();

        if state.is_terminal() {
            debug!(reason = %reason, state = %state, "Disconnect ignored in terminal state");
            return;
        }

        if reason == LOGOUT_REASON {
            info!("Session signed out remotely; no automatic reconnect");
            if let Err(e) = self.backend.stop().await {
                debug!(error = %e, "Backend stop after remote logout failed");
            }
            self.transition(SessionState::Uninitialized, None, None).await;
            return;
        }

        self.transition(SessionState::Disconnected, None, Some(reason))
            .await;
        self.schedule_reconnect().await;
    }

    /// A reconnect delay elapsed: rebuild the session.
    async fn handle_reconnect_due(&mut self) {
        // A duplicate disconnect may have scheduled a second timer after
        // this message was queued (the guard in `schedule_reconnect` cannot
        // see a finished timer task). Abort it instead of leaking it.
        self.cancel_reconnect();

        if self.state() != SessionState::Disconnected {
            debug!(state = %self.state(), "Reconnect timer fired in unexpected state; ignoring");
            return;
        }
        if self.starting {
            debug!("Reconnect already in flight; ignoring stray timer");
            return;
        }

        info!(attempt = self.retry.attempt(), "Attempting reconnect");

        // Release whatever is left of the dead resource first.
        if let Err(e) = self.backend.stop().await {
            debug!(error = %e, "Backend stop before reconnect failed");
        }

        match self.backend.start(self.backend_tx.clone()).await {
            Ok(()) => self.starting = true,
            Err(e) => {
                warn!(error = %e, attempt = self.retry.attempt(), "Reconnect attempt failed");
                self.schedule_reconnect().await;
            }
        }
    }

    /// Schedules exactly one reconnect timer, or gives up once the retry
    /// state is exhausted.
    async fn schedule_reconnect(&mut self) {
        if self
            .reconnect_timer
            .as_ref()
            .is_some_and(|t| !t.is_finished())
        {
            debug!("Reconnect already scheduled; duplicate timer suppressed");
            return;
        }

        match self.retry.take_attempt() {
            Some(delay) => {
                let attempt = self.retry.attempt();
                self.shared.lock().retry_attempt = attempt;
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );

                let tx = self.control_tx.clone();
                self.reconnect_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(ControlMsg::ReconnectDue);
                }));

                self.publish_status(SessionState::Disconnected, None).await;
            }
            None => {
                let attempts = self.retry.attempt();
                error!(attempts, "Reconnect attempts exhausted; manual reinitialize required");
                self.transition(
                    SessionState::MaxRetriesExceeded,
                    None,
                    Some(Error::max_retries_exceeded(attempts).to_string()),
                )
                .await;
            }
        }
    }

    /// Aborts any pending reconnect timer.
    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
            debug!("Pending reconnect cancelled");
        }
    }

    /// Brings up the backend; on failure, resets to `Uninitialized` and
    /// surfaces the error through the transition broadcast.
    async fn start_backend(&mut self) -> Result<()> {
        self.starting = true;
        info!("Starting messaging backend");

        match self.backend.start(self.backend_tx.clone()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "Backend start failed");
                self.starting = false;
                self.transition(SessionState::Uninitialized, None, Some(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Liveness check. Observability only: recovery is driven solely by the
    /// `Disconnected` transition.
    async fn keepalive_probe(&self) {
        if self.state() != SessionState::Connected {
            return;
        }
        if !self.backend.is_alive().await {
            warn!("Keep-alive probe failed while state reports connected");
        }
    }

    /// Releases every owned resource and acknowledges the caller.
    async fn teardown(&mut self, reply: Option<oneshot::Sender<()>>) {
        info!("Destroying session coordinator");
        self.cancel_reconnect();
        if let Some(task) = self.bus_task.take() {
            task.abort();
        }
        if let Err(e) = self.backend.stop().await {
            debug!(error = %e, "Backend stop during destroy failed");
        }
        self.transition(SessionState::Destroyed, None, None).await;
        if let Some(tx) = reply {
            let _ = tx.send(());
        }
    }

    // ------------------------------------------------------------------
    // Transition function
    // ------------------------------------------------------------------

    /// The serialized transition point: updates the snapshot, resets retry
    /// state on `Connected`, publishes the status record, and notifies
    /// subscribers.
    async fn transition(
        &mut self,
        to: SessionState,
        token: Option<PairingToken>,
        error: Option<String>,
    ) {
        if to == SessionState::Connected {
            self.retry.reset();
        }

        let from;
        {
            let mut shared = self.shared.lock();
            from = shared.state;
            if from == to && token.is_none() && error.is_none() {
                return;
            }
            shared.state = to;
            shared.retry_attempt = self.retry.attempt();
            match to {
                // A fresh pairing entry supersedes any older token.
                SessionState::PairingPending => shared.token = token.clone(),
                SessionState::Authenticated
                | SessionState::Connected
                | SessionState::Uninitialized
                | SessionState::Destroyed => shared.token = None,
                _ => {}
            }
        }

        match error {
            Some(ref e) => warn!(from = %from, to = %to, error = %e, "Session transition"),
            None => info!(from = %from, to = %to, "Session transition"),
        }

        self.publish_status(to, token.as_ref()).await;
        let _ = self.transitions.send(Transition {
            from,
            to,
            token,
            error,
        });
    }

    /// Writes the cross-process view of this transition. Store failures are
    /// logged and never fail the state machine.
    async fn publish_status(&self, to: SessionState, token: Option<&PairingToken>) {
        if to == SessionState::Destroyed {
            if let Err(e) = self.status.remove().await {
                warn!(error = %e, "Failed to remove status record");
            }
            return;
        }

        let record = {
            let shared = self.shared.lock();
            StatusRecord::now(
                shared.state,
                shared.token.as_ref().is_some_and(|t| !t.is_expired()),
                shared.retry_attempt,
            )
        };
        if let Err(e) = self.status.put(&record).await {
            warn!(error = %e, "Failed to write status record");
        }

        match to {
            SessionState::PairingPending => {
                if let Some(token) = token
                    && let Err(e) = self
                        .status
                        .put_pairing_token(token.payload(), token.ttl())
                        .await
                {
                    warn!(error = %e, "Failed to publish pairing token");
                }
            }
            SessionState::Authenticated
            | SessionState::Connected
            | SessionState::Uninitialized => {
                if let Err(e) = self.status.clear_pairing_token().await {
                    warn!(error = %e, "Failed to clear pairing token");
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::backend::testing::{MockBackend, StartOutcome};
    use crate::bus::InProcessBus;
    use crate::status::MemoryStatusStore;

    /// Spawns a controller over a mock backend with a short quiesce.
    async fn spawn_controller(
        backend: Arc<MockBackend>,
    ) -> (SessionController, Arc<MemoryStatusStore>, Arc<InProcessBus>) {
        let bus = Arc::new(InProcessBus::new());
        let store = Arc::new(MemoryStatusStore::new());
        let config = CoordinatorConfig::default().with_quiesce(Duration::from_millis(10));

        let controller =
            SessionController::spawn(backend, bus.clone(), store.clone(), config)
                .await
                .expect("spawn");
        (controller, store, bus)
    }

    /// Awaits the next transition into `want`.
    async fn wait_for_state(rx: &mut broadcast::Receiver<Transition>, want: SessionState) {
        loop {
            let transition = tokio::time::timeout(Duration::from_secs(600), rx.recv())
                .await
                .expect("no transition before deadline")
                .expect("transition channel closed");
            if transition.to == want {
                return;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_reaches_connected() {
        let backend = MockBackend::new();
        let (controller, store, _bus) = spawn_controller(backend.clone()).await;
        let mut rx = controller.subscribe();

        controller.initialize().expect("initialize");
        wait_for_state(&mut rx, SessionState::Connected).await;

        assert!(controller.is_ready());
        assert_eq!(controller.state(), SessionState::Connected);

        let record = store.get().await.expect("get").expect("record present");
        assert!(record.connected);
        assert_eq!(record.state, SessionState::Connected);
        assert_eq!(record.retry_attempt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_initialize_creates_one_resource() {
        let backend = MockBackend::new();
        let (controller, _store, _bus) = spawn_controller(backend.clone()).await;
        let mut rx = controller.subscribe();

        controller.initialize().expect("initialize");
        controller.initialize().expect("initialize");
        controller.initialize().expect("initialize");
        wait_for_state(&mut rx, SessionState::Connected).await;

        // A late call against a live session is also a no-op.
        controller.initialize().expect("initialize");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(backend.start_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_state_publishes_token() {
        let backend = MockBackend::new();
        backend.push_start(StartOutcome::Events(vec![BackendEvent::PairingCodeIssued {
            payload: "qr-abc".to_string(),
        }]));
        let (controller, store, _bus) = spawn_controller(backend.clone()).await;
        let mut rx = controller.subscribe();

        controller.initialize().expect("initialize");
        wait_for_state(&mut rx, SessionState::PairingPending).await;

        let record = store.get().await.expect("get").expect("record present");
        assert_eq!(record.state, SessionState::PairingPending);
        assert!(record.pairing_available);
        assert_eq!(
            store.pairing_payload().await.expect("payload"),
            Some("qr-abc".to_string())
        );

        // Connecting invalidates the token everywhere.
        backend.emit(BackendEvent::Authenticated);
        backend.emit(BackendEvent::Ready);
        wait_for_state(&mut rx, SessionState::Connected).await;

        assert!(controller.pairing_token().is_none());
        assert_eq!(store.pairing_payload().await.expect("payload"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_disconnect_skips_reconnect() {
        let backend = MockBackend::new();
        let (controller, store, _bus) = spawn_controller(backend.clone()).await;
        let mut rx = controller.subscribe();

        controller.initialize().expect("initialize");
        wait_for_state(&mut rx, SessionState::Connected).await;

        backend.emit(BackendEvent::Disconnected {
            reason: "logout".to_string(),
        });
        wait_for_state(&mut rx, SessionState::Uninitialized).await;

        let record = store.get().await.expect("get").expect("record present");
        assert_eq!(record.retry_attempt, 0);

        // No reconnect ever fires.
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(backend.start_calls(), 1);
        assert_eq!(controller.state(), SessionState::Uninitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_disconnect_schedules_one_reconnect() {
        let backend = MockBackend::new();
        let (controller, _store, _bus) = spawn_controller(backend.clone()).await;
        let mut rx = controller.subscribe();

        controller.initialize().expect("initialize");
        wait_for_state(&mut rx, SessionState::Connected).await;

        // Duplicate loss reports collapse into a single timer.
        backend.emit(BackendEvent::Disconnected {
            reason: "stream error".to_string(),
        });
        backend.emit(BackendEvent::Disconnected {
            reason: "stream error".to_string(),
        });
        wait_for_state(&mut rx, SessionState::Disconnected).await;

        wait_for_state(&mut rx, SessionState::Connected).await;
        assert_eq!(backend.start_calls(), 2);

        // Retry counter resets on the successful reconnect.
        assert_eq!(controller.status().retry_attempt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_retries_is_terminal() {
        let backend = MockBackend::new();
        let (controller, store, _bus) = spawn_controller(backend.clone()).await;
        let mut rx = controller.subscribe();

        controller.initialize().expect("initialize");
        wait_for_state(&mut rx, SessionState::Connected).await;

        for _ in 0..5 {
            backend.push_start(StartOutcome::Fail("engine unavailable".to_string()));
        }
        backend.emit(BackendEvent::Disconnected {
            reason: "stream error".to_string(),
        });
        wait_for_state(&mut rx, SessionState::MaxRetriesExceeded).await;

        // 1 initial start + 5 failed reconnects.
        assert_eq!(backend.start_calls(), 6);
        let record = store.get().await.expect("get").expect("record present");
        assert_eq!(record.retry_attempt, 5);

        // The attempt counter stays frozen with no further attempts.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(backend.start_calls(), 6);
        assert_eq!(controller.status().retry_attempt, 5);
        assert_eq!(controller.state(), SessionState::MaxRetriesExceeded);

        // initialize() cannot leave the terminal state.
        controller.initialize().expect("initialize");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.start_calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinitialize_recovers_from_terminal_state() {
        let backend = MockBackend::new();
        backend.push_start(StartOutcome::Events(vec![
            BackendEvent::PairingCodeIssued {
                payload: "qr-1".to_string(),
            },
            BackendEvent::AuthFailed {
                message: "scan rejected".to_string(),
            },
        ]));
        let (controller, _store, _bus) = spawn_controller(backend.clone()).await;
        let mut rx = controller.subscribe();

        controller.initialize().expect("initialize");
        wait_for_state(&mut rx, SessionState::AuthFailed).await;

        controller.reinitialize().await.expect("reinitialize");
        wait_for_state(&mut rx, SessionState::Connected).await;

        assert_eq!(backend.logout_calls(), 1);
        assert_eq!(backend.start_calls(), 2);
        assert!(controller.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_roundtrip_when_connected() {
        let backend = MockBackend::new();
        let (controller, _store, _bus) = spawn_controller(backend.clone()).await;
        let mut rx = controller.subscribe();

        controller.initialize().expect("initialize");
        wait_for_state(&mut rx, SessionState::Connected).await;

        let receipt = controller.send("5551234567", "hello").await.expect("send");
        assert_eq!(receipt.message_id, "msg-1");
        assert_eq!(backend.send_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_fails_not_ready_without_network_calls() {
        let backend = MockBackend::new();
        let (controller, _store, _bus) = spawn_controller(backend.clone()).await;

        let err = controller.send("5551234567", "hello").await.unwrap_err();
        assert!(matches!(err, Error::NotReady { .. }));
        assert!(err.is_retryable());
        assert_eq!(backend.network_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_send_executes_against_live_session() {
        let backend = MockBackend::new();
        let (controller, _store, bus) = spawn_controller(backend.clone()).await;
        let mut rx = controller.subscribe();

        controller.initialize().expect("initialize");
        wait_for_state(&mut rx, SessionState::Connected).await;

        bus.publish(Command::send("5551234567", "from another process"))
            .await
            .expect("publish");

        // Fire-and-forget: poll the mock for completion.
        while backend.send_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(backend.send_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_send_failure_is_swallowed() {
        let backend = MockBackend::new();
        let (controller, _store, bus) = spawn_controller(backend.clone()).await;

        // Not connected: the send is rejected inside the owning process and
        // never reaches the network. The publisher sees nothing.
        bus.publish(Command::send("5551234567", "dropped"))
            .await
            .expect("publish");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(backend.network_calls(), 0);
        assert_eq!(controller.state(), SessionState::Uninitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_logout_executes_unconditionally() {
        let backend = MockBackend::new();
        let (controller, _store, bus) = spawn_controller(backend.clone()).await;
        let mut rx = controller.subscribe();

        controller.initialize().expect("initialize");
        wait_for_state(&mut rx, SessionState::Connected).await;

        bus.publish(Command::Logout).await.expect("publish");
        wait_for_state(&mut rx, SessionState::Uninitialized).await;

        assert_eq!(backend.logout_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_releases_everything() {
        let backend = MockBackend::new();
        let (controller, store, _bus) = spawn_controller(backend.clone()).await;
        let mut rx = controller.subscribe();

        controller.initialize().expect("initialize");
        wait_for_state(&mut rx, SessionState::Connected).await;

        controller.destroy().await.expect("destroy");
        assert_eq!(controller.state(), SessionState::Destroyed);
        assert!(backend.stop_calls() >= 1);
        assert!(store.get().await.expect("get").is_none());

        // Idempotent, and later calls fail cleanly.
        controller.destroy().await.expect("second destroy");
        let err = controller.send("5551234567", "late").await.unwrap_err();
        assert!(matches!(err, Error::ControllerClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_aborts_pending_reconnect() {
        let backend = MockBackend::new();
        let (controller, _store, _bus) = spawn_controller(backend.clone()).await;
        let mut rx = controller.subscribe();

        controller.initialize().expect("initialize");
        wait_for_state(&mut rx, SessionState::Connected).await;

        backend.emit(BackendEvent::Disconnected {
            reason: "stream error".to_string(),
        });
        wait_for_state(&mut rx, SessionState::Disconnected).await;

        controller.destroy().await.expect("destroy");
        tokio::time::sleep(Duration::from_secs(120)).await;

        // The scheduled retry never ran.
        assert_eq!(backend.start_calls(), 1);
        assert_eq!(controller.state(), SessionState::Destroyed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_mismatch_is_not_a_recovery_path() {
        let backend = MockBackend::new();
        let (controller, _store, _bus) = spawn_controller(backend.clone()).await;
        let mut rx = controller.subscribe();

        controller.initialize().expect("initialize");
        wait_for_state(&mut rx, SessionState::Connected).await;

        backend.set_alive(false);
        tokio::time::sleep(Duration::from_secs(120)).await;

        // The probe only warns; state and resource are untouched.
        assert_eq!(controller.state(), SessionState::Connected);
        assert_eq!(backend.start_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_coordinator_is_inert() {
        let backend = MockBackend::new();
        let bus = Arc::new(InProcessBus::new());
        let store = Arc::new(MemoryStatusStore::new());
        let config = CoordinatorConfig::default().with_enabled(false);

        let controller = SessionController::spawn(
            backend.clone(),
            bus.clone(),
            store.clone(),
            config,
        )
        .await
        .expect("spawn");

        controller.initialize().expect("no-op initialize");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!controller.is_ready());
        assert_eq!(backend.start_calls(), 0);
        assert_eq!(bus.subscriber_count(), 0);

        let err = controller.send("5551234567", "hi").await.unwrap_err();
        assert!(matches!(err, Error::Disabled));

        controller.destroy().await.expect("destroy no-op");
    }

    #[tokio::test]
    async fn test_spawn_rejects_invalid_config() {
        let backend = MockBackend::new();
        let bus = Arc::new(InProcessBus::new());
        let store = Arc::new(MemoryStatusStore::new());
        let config = CoordinatorConfig::default().with_max_attempts(0);

        let result = SessionController::spawn(backend, bus, store, config).await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_controller_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<SessionController>();
    }

    // ------------------------------------------------------------------
    // Reconnect timer edge cases (actor driven directly)
    // ------------------------------------------------------------------

    /// Builds a bare actor around `backend` for driving handlers directly.
    fn actor_for(
        backend: Arc<MockBackend>,
        state: SessionState,
        starting: bool,
    ) -> ControllerActor {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (backend_tx, backend_rx) = mpsc::unbounded_channel();
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let config = CoordinatorConfig::default();
        let retry = RetryState::new(RetryPolicy::new(
            config.backoff_base,
            config.backoff_cap,
            config.max_attempts,
        ));

        ControllerActor {
            backend,
            status: Arc::new(MemoryStatusStore::new()),
            dispatcher: MessageDispatcher::new(config.country_code.clone()),
            config,
            shared: Arc::new(Mutex::new(Shared {
                state,
                retry_attempt: 0,
                token: None,
            })),
            transitions,
            control_rx,
            control_tx,
            backend_rx,
            backend_tx,
            retry,
            reconnect_timer: None,
            starting,
            bus_task: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stray_timer_does_not_preempt_inflight_start() {
        let backend = MockBackend::new();
        let mut actor = actor_for(backend.clone(), SessionState::Disconnected, true);

        // A bring-up is already underway (start returned, no event yet). A
        // stray timer message must not stop it and race a second attempt.
        actor.handle_reconnect_due().await;

        assert_eq!(backend.stop_calls(), 0);
        assert_eq!(backend.start_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseding_timer_is_aborted_on_fire() {
        let backend = MockBackend::new();
        let mut actor = actor_for(backend.clone(), SessionState::Disconnected, false);

        // Duplicate disconnect scheduled a second timer while this fire was
        // already queued.
        let tx = actor.control_tx.clone();
        actor.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = tx.send(ControlMsg::ReconnectDue);
        }));

        actor.handle_reconnect_due().await;
        assert_eq!(backend.start_calls(), 1);

        // The superseded timer was aborted, not leaked: no stray message
        // arrives after its delay would have elapsed.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(actor.control_rx.try_recv().is_err());
    }
}
