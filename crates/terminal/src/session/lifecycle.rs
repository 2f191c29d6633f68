//! Exactly-once close coordination.
//!
//! Every teardown trigger (pump failure, process exit, explicit close,
//! staleness sweep) funnels through a session's [`CloseSignal`]. The
//! signal fires once; whichever caller wins performs the teardown and all
//! others are no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use portable_pty::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::registry::Registry;
use super::SessionId;

/// One-shot close signal.
///
/// [`fire`](CloseSignal::fire) returns `true` for exactly one caller no
/// matter how many race; every later invocation is a safe no-op. Waiters
/// observe the signal through [`closed`](CloseSignal::closed).
#[derive(Clone)]
pub struct CloseSignal {
    fired: Arc<AtomicBool>,
    token: CancellationToken,
}

impl CloseSignal {
    /// Creates an unfired signal.
    pub fn new() -> Self {
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            token: CancellationToken::new(),
        }
    }

    /// Fires the signal. Returns `true` only for the first caller.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Whether the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Resolves once the signal has fired.
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Starts the exit watcher for a session's shell process.
///
/// The watcher parks the child in a blocking `wait` and requests close
/// unconditionally once the process terminates, whether it exited,
/// was signaled, or failed. Output still buffered in the PTY at that
/// moment may be truncated; close-on-exit takes precedence over draining.
pub(crate) fn spawn_exit_watcher(
    registry: Arc<Registry>,
    id: SessionId,
    mut child: Box<dyn Child + Send + Sync>,
) {
    tokio::spawn(async move {
        let status = tokio::task::spawn_blocking(move || child.wait()).await;
        match status {
            Ok(Ok(status)) => {
                debug!(session_id = %id, exit_code = status.exit_code(), "shell exited");
            }
            Ok(Err(e)) => {
                warn!(session_id = %id, error = %e, "waiting for shell failed");
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "exit watcher task failed");
            }
        }
        registry.close(&id).await;
    });
}
