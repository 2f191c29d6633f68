//! Terminal session management.
//!
//! One [`Session`] represents a live interactive shell bound to one duplex
//! network connection. Sessions are created and owned by the [`Registry`],
//! bridged by the pump loops in [`bridge`], and torn down exactly once via
//! the close signal in [`lifecycle`].
//!
//! A session moves through three states: *active* (registered, pumps
//! running), *closing* (the close signal has fired, teardown in progress),
//! and *closed* (resources released, entry removed from the registry). Any
//! of connection error/close, process exit, an explicit close call, or the
//! staleness sweep drives the active → closing transition; the closing →
//! closed transition happens exactly once regardless of how many triggers
//! race.

pub mod bridge;
pub mod lifecycle;
pub mod pty;
pub mod registry;

pub use lifecycle::CloseSignal;
pub use registry::Registry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use portable_pty::{ChildKiller, MasterPty};
use thiserror::Error;
use tracing::debug;

use crate::transport::{Duplex, TransportError};

/// Unique identifier for a session.
pub type SessionId = String;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session with this id already exists.
    #[error("duplicate session id: {0}")]
    Duplicate(SessionId),

    /// The session was not found.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The configured session limit was reached.
    #[error("session limit reached: {0} active")]
    LimitReached(usize),

    /// Failed to allocate a PTY or start the shell.
    #[error("failed to spawn shell: {0}")]
    SpawnFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// I/O failure on the process side of the bridge.
    #[error("process I/O failed: {0}")]
    Process(String),

    /// I/O failure on the network side of the bridge.
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
}

/// A live interactive shell bound to one network connection.
///
/// The session exclusively owns its PTY master, its shell process (through
/// the kill handle; the process handle itself is parked in the exit
/// watcher), and its duplex connection. All three are released exactly
/// once, by the teardown path in [`Registry::close`].
pub struct Session {
    /// Unique session identifier.
    id: SessionId,

    /// PTY master; taken (and thereby closed) during teardown.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,

    /// Kill handle for the shell process.
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,

    /// The duplex connection to the client.
    conn: Arc<dyn Duplex>,

    /// One-shot close signal shared by every teardown trigger.
    signal: CloseSignal,

    /// Process id of the shell, when the platform exposes one.
    pid: Option<u32>,

    /// Wall-clock creation time, for the session-list query.
    created_at: SystemTime,

    /// Monotonic anchor for activity accounting.
    started: Instant,

    /// Milliseconds since `started` of the most recent byte transfer.
    /// Updated with `fetch_max`, so it never moves backward even under
    /// concurrent touches from both pumps.
    last_activity_ms: AtomicU64,

    /// Current geometry (cols, rows).
    geometry: Mutex<(u16, u16)>,
}

impl Session {
    /// Creates a session around freshly spawned PTY resources.
    pub(crate) fn new(
        id: SessionId,
        master: Box<dyn MasterPty + Send>,
        killer: Box<dyn ChildKiller + Send + Sync>,
        pid: Option<u32>,
        conn: Arc<dyn Duplex>,
        cols: u16,
        rows: u16,
    ) -> Self {
        Self {
            id,
            master: Mutex::new(Some(master)),
            killer: Mutex::new(killer),
            conn,
            signal: CloseSignal::new(),
            pid,
            created_at: SystemTime::now(),
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            geometry: Mutex::new((cols, rows)),
        }
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the process ID of the shell, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the duplex connection to the client.
    pub fn connection(&self) -> &Arc<dyn Duplex> {
        &self.conn
    }

    /// Returns the session's close signal.
    pub fn signal(&self) -> &CloseSignal {
        &self.signal
    }

    /// Returns the creation time.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Returns the wall-clock time of the most recent byte transfer.
    pub fn last_used(&self) -> SystemTime {
        self.created_at + Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed))
    }

    /// Returns how long the session has been idle.
    pub fn idle_for(&self) -> Duration {
        let elapsed = self.started.elapsed().as_millis() as u64;
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(elapsed.saturating_sub(last))
    }

    /// Records activity. Called by both pumps on every byte transferred.
    pub fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Returns the current terminal geometry as (cols, rows).
    pub fn geometry(&self) -> (u16, u16) {
        *self.geometry.lock().unwrap()
    }

    /// Applies a resize request.
    ///
    /// Zero dimensions are ignored without error, and resizing a session
    /// whose PTY has already been released during teardown is a no-op:
    /// a malformed or late resize must never kill a session.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if cols == 0 || rows == 0 {
            debug!(session_id = %self.id, cols, rows, "ignoring resize to zero dimensions");
            return Ok(());
        }

        {
            let master = self.master.lock().unwrap();
            match master.as_ref() {
                Some(master) => {
                    pty::resize(master.as_ref(), cols, rows)?;
                }
                None => return Ok(()),
            }
        }

        *self.geometry.lock().unwrap() = (cols, rows);
        debug!(session_id = %self.id, cols, rows, "resized PTY");
        Ok(())
    }

    /// Releases the PTY master. Part of teardown; idempotent.
    pub(crate) fn close_pty(&self) {
        self.master.lock().unwrap().take();
    }

    /// Best-effort termination of the shell process.
    pub(crate) fn kill(&self) {
        if let Err(e) = self.killer.lock().unwrap().kill() {
            // The process usually exited already by the time teardown runs.
            debug!(session_id = %self.id, error = %e, "kill reported error");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("geometry", &self.geometry())
            .field("closing", &self.signal.is_fired())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport;

    fn spawn_test_session() -> Session {
        let spawned = pty::spawn(Some("/bin/sh"), Vec::new(), 80, 24).unwrap();
        let (server, _client) = transport::pair();
        Session::new(
            "test".to_string(),
            spawned.master,
            spawned.killer,
            spawned.pid,
            Arc::new(server),
            80,
            24,
        )
    }

    #[tokio::test]
    async fn test_session_geometry_tracks_resize() {
        let session = spawn_test_session();
        assert_eq!(session.geometry(), (80, 24));

        session.resize(100, 40).unwrap();
        assert_eq!(session.geometry(), (100, 40));

        session.kill();
    }

    #[tokio::test]
    async fn test_session_resize_zero_ignored() {
        let session = spawn_test_session();

        session.resize(0, 40).unwrap();
        session.resize(100, 0).unwrap();
        assert_eq!(session.geometry(), (80, 24));

        session.kill();
    }

    #[tokio::test]
    async fn test_session_resize_after_close_pty_is_noop() {
        let session = spawn_test_session();

        session.close_pty();
        session.resize(100, 40).unwrap();
        assert_eq!(session.geometry(), (80, 24));

        session.kill();
    }

    #[tokio::test]
    async fn test_touch_advances_last_used() {
        let session = spawn_test_session();
        let before = session.last_used();

        tokio::time::sleep(Duration::from_millis(20)).await;
        session.touch();

        assert!(session.last_used() >= before);
        assert!(session.idle_for() < Duration::from_millis(500));

        session.kill();
    }

    #[tokio::test]
    async fn test_idle_grows_without_activity() {
        let session = spawn_test_session();
        session.touch();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(session.idle_for() >= Duration::from_millis(20));

        session.kill();
    }
}
