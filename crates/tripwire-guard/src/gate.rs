//! One-shot readiness signal between the interception server and its launcher.
//!
//! The gate starts `NotReady` and flips to `Ready` exactly once, from the
//! server's handshake handler. It never flips back. Waiters block on the
//! signal itself rather than on handshake responses, so "ready" as seen by the
//! orchestrator always means the serving loop was already dispatching requests.

use crate::{GuardError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Monotonic `NotReady -> Ready` signal.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    state: Arc<watch::Sender<bool>>,
}

impl ReadinessGate {
    /// Create a gate in the `NotReady` state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Transition to `Ready`.
    ///
    /// Returns `true` only for the call that performed the transition; later
    /// calls are no-ops and return `false`.
    pub fn mark_ready(&self) -> bool {
        self.state.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    /// Whether the gate has been opened.
    pub fn is_ready(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait until the gate is `Ready`. Returns immediately if it already is.
    ///
    /// # Errors
    /// * `GuardError::Internal` - The signal was torn down while waiting,
    ///   which cannot happen while this gate is alive.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        rx.wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|e| GuardError::Internal(format!("readiness signal closed: {e}")))
    }

    /// Wait until the gate is `Ready`, giving up after `limit`.
    ///
    /// # Errors
    /// * `GuardError::NotReady` - The gate was still closed after `limit`.
    pub async fn wait_timeout(&self, limit: Duration) -> Result<()> {
        match tokio::time::timeout(limit, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(GuardError::NotReady { waited: limit }),
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}
