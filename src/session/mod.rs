//! Session lifecycle: state machine, backoff policy, and the controller actor.

mod controller;
mod retry;
mod state;

pub use controller::SessionController;
pub use retry::{RetryPolicy, RetryState};
pub use state::{SessionState, Transition};
