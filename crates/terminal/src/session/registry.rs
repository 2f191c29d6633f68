//! Concurrency-safe directory of active sessions.
//!
//! The registry owns every live [`Session`] and is the lifecycle
//! coordinator's entry point: all teardown triggers call
//! [`Registry::close`], which performs the exactly-once teardown and
//! removes the entry. Map locks guard only map mutation and iteration,
//! never blocking I/O.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use protocol::messages::{SessionEntry, SessionOpen};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::transport::Duplex;

use super::{bridge, lifecycle, pty, Session, SessionError, SessionId};

/// Directory of live sessions.
pub struct Registry {
    /// Map of session ID to session.
    sessions: DashMap<SessionId, Arc<Session>>,

    /// Shell used when an open request names none.
    default_shell: String,

    /// Cap on concurrently live sessions.
    max_sessions: usize,
}

impl Registry {
    /// Creates a registry using the given session configuration.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            default_shell: config.default_shell,
            max_sessions: config.max_sessions,
        }
    }

    /// Opens a new session over an established connection.
    ///
    /// Spawns the requested shell (or the configured default) on a fresh
    /// PTY at the requested geometry, registers the session, and starts
    /// its two pump loops and exit watcher. The connection must already be
    /// upgraded and authenticated by the caller, and the geometry
    /// validated.
    pub async fn open(
        self: &Arc<Self>,
        request: SessionOpen,
        conn: Arc<dyn Duplex>,
    ) -> Result<SessionId, SessionError> {
        let id = request
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Fast-fail checks before paying for a spawn; the entry insert
        // below re-checks the id for races.
        if self.sessions.contains_key(&id) {
            return Err(SessionError::Duplicate(id));
        }
        if self.sessions.len() >= self.max_sessions {
            return Err(SessionError::LimitReached(self.sessions.len()));
        }

        let shell = request
            .shell
            .unwrap_or_else(|| self.default_shell.clone());

        let spawned = pty::spawn(Some(shell.as_str()), Vec::new(), request.cols, request.rows)?;

        let session = Arc::new(Session::new(
            id.clone(),
            spawned.master,
            spawned.killer,
            spawned.pid,
            conn,
            request.cols,
            request.rows,
        ));

        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => {
                // Lost a race on the id: reap the freshly spawned shell.
                let mut child = spawned.child;
                tokio::task::spawn_blocking(move || {
                    let _ = child.kill();
                    let _ = child.wait();
                });
                return Err(SessionError::Duplicate(id));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&session));
            }
        }

        bridge::spawn_output_pump(Arc::clone(self), Arc::clone(&session), spawned.reader);
        bridge::spawn_input_pump(Arc::clone(self), Arc::clone(&session), spawned.writer);
        lifecycle::spawn_exit_watcher(Arc::clone(self), id.clone(), spawned.child);

        info!(
            session_id = %id,
            pid = ?session.pid(),
            shell = %shell,
            cols = request.cols,
            rows = request.rows,
            "session opened"
        );

        Ok(id)
    }

    /// Looks up a session by id.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a session with this id is live.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Returns the number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Removes a session entry without tearing it down.
    ///
    /// Idempotent; an absent id returns `None`. Normal teardown goes
    /// through [`close`](Registry::close), which calls this last.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Snapshot of live sessions for the session-list query.
    pub fn list(&self) -> Vec<SessionEntry> {
        self.sessions
            .iter()
            .map(|entry| {
                let session = entry.value();
                SessionEntry {
                    id: session.id().clone(),
                    created_at: unix_millis(session.created_at()),
                    last_used: unix_millis(session.last_used()),
                }
            })
            .collect()
    }

    /// Resizes a session from outside its connection (the caller-facing
    /// API path; in-band resize frames take the same tolerant route).
    pub fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        let session = self
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.resize(cols, rows)
    }

    /// Tears down a session.
    ///
    /// Idempotent and safe to call concurrently from the pumps, the exit
    /// watcher, the staleness sweep, or an explicit close request; exactly
    /// one caller performs the teardown. Unknown ids are a no-op.
    ///
    /// Teardown order: win the close signal, release the PTY master,
    /// close the connection, best-effort kill the shell, remove the entry.
    pub async fn close(&self, id: &str) {
        let Some(session) = self.get(id) else {
            return;
        };
        if !session.signal().fire() {
            return;
        }

        session.close_pty();
        if let Err(e) = session.connection().close().await {
            debug!(session_id = %id, error = %e, "connection close reported error");
        }
        session.kill();
        self.remove(id);

        info!(session_id = %id, "session closed");
    }

    /// Closes sessions idle longer than `idle_threshold`.
    ///
    /// Candidate ids are collected while iterating; the closes run
    /// afterwards, so map locks are never held across teardown I/O (close
    /// re-enters the registry to remove the entry). Returns the number of
    /// sessions closed.
    pub async fn sweep(&self, idle_threshold: Duration) -> usize {
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() > idle_threshold)
            .map(|entry| entry.key().clone())
            .collect();

        for id in &stale {
            self.close(id).await;
        }

        if !stale.is_empty() {
            info!(count = stale.len(), "closed stale sessions");
        }
        stale.len()
    }

    /// Starts the periodic staleness sweep.
    ///
    /// Advisory only: sessions idle past `idle_threshold` are closed at
    /// the next tick, not the moment they expire.
    pub fn start_sweep_task(self: &Arc<Self>, interval: Duration, idle_threshold: Duration) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                registry.sweep(idle_threshold).await;
            }
        });
    }
}

/// Milliseconds since the Unix epoch, saturating at zero for pre-epoch
/// clocks.
fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport;
    use protocol::messages::SessionOpen;

    fn test_registry() -> Arc<Registry> {
        Arc::new(Registry::new(SessionConfig::default()))
    }

    fn open_request(id: &str) -> SessionOpen {
        SessionOpen {
            session_id: Some(id.to_string()),
            shell: Some("/bin/sh".to_string()),
            cols: 80,
            rows: 24,
        }
    }

    #[tokio::test]
    async fn test_open_and_get() {
        let registry = test_registry();
        let (server, _client) = transport::pair();

        let id = registry
            .open(open_request("s1"), Arc::new(server))
            .await
            .unwrap();
        assert_eq!(id, "s1");

        let session = registry.get(&id).unwrap();
        assert_eq!(session.geometry(), (80, 24));
        assert!(registry.contains(&id));
        assert_eq!(registry.count(), 1);

        registry.close(&id).await;
    }

    #[tokio::test]
    async fn test_open_generates_id_when_absent() {
        let registry = test_registry();
        let (server, _client) = transport::pair();

        let request = SessionOpen {
            session_id: None,
            shell: Some("/bin/sh".to_string()),
            cols: 80,
            rows: 24,
        };
        let id = registry.open(request, Arc::new(server)).await.unwrap();
        assert!(!id.is_empty());

        registry.close(&id).await;
    }

    #[tokio::test]
    async fn test_open_duplicate_id_rejected() {
        let registry = test_registry();
        let (server1, _client1) = transport::pair();
        let (server2, _client2) = transport::pair();

        let id = registry
            .open(open_request("dup"), Arc::new(server1))
            .await
            .unwrap();

        let result = registry.open(open_request("dup"), Arc::new(server2)).await;
        assert!(matches!(result, Err(SessionError::Duplicate(_))));

        // The existing session is untouched.
        assert!(registry.contains(&id));

        registry.close(&id).await;
    }

    #[tokio::test]
    async fn test_open_respects_session_limit() {
        let config = SessionConfig {
            max_sessions: 1,
            ..SessionConfig::default()
        };
        let registry = Arc::new(Registry::new(config));
        let (server1, _client1) = transport::pair();
        let (server2, _client2) = transport::pair();

        let id = registry
            .open(open_request("only"), Arc::new(server1))
            .await
            .unwrap();

        let result = registry
            .open(open_request("overflow"), Arc::new(server2))
            .await;
        assert!(matches!(result, Err(SessionError::LimitReached(1))));

        registry.close(&id).await;
    }

    #[tokio::test]
    async fn test_open_bad_shell_creates_nothing() {
        let registry = test_registry();
        let (server, _client) = transport::pair();

        let request = SessionOpen {
            session_id: Some("bad".to_string()),
            shell: Some("/nonexistent/shell/xyz".to_string()),
            cols: 80,
            rows: 24,
        };
        let result = registry.open(request, Arc::new(server)).await;
        assert!(matches!(result, Err(SessionError::SpawnFailed(_))));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_close_removes_and_is_idempotent() {
        let registry = test_registry();
        let (server, _client) = transport::pair();

        let id = registry
            .open(open_request("s1"), Arc::new(server))
            .await
            .unwrap();

        registry.close(&id).await;
        assert!(registry.get(&id).is_none());
        assert!(!registry.contains(&id));

        // Second close is a no-op.
        registry.close(&id).await;
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_close_unknown_id_is_noop() {
        let registry = test_registry();
        registry.close("never-existed").await;
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_remove_absent_returns_none() {
        let registry = test_registry();
        assert!(registry.remove("missing").is_none());
    }

    #[tokio::test]
    async fn test_list_reports_entries() {
        let registry = test_registry();
        let (server1, _client1) = transport::pair();
        let (server2, _client2) = transport::pair();

        let id1 = registry
            .open(open_request("a"), Arc::new(server1))
            .await
            .unwrap();
        let id2 = registry
            .open(open_request("b"), Arc::new(server2))
            .await
            .unwrap();

        let entries = registry.list();
        assert_eq!(entries.len(), 2);
        let ids: Vec<_> = entries.iter().map(|e| e.id.clone()).collect();
        assert!(ids.contains(&id1));
        assert!(ids.contains(&id2));
        for entry in &entries {
            assert!(entry.created_at > 0);
            assert!(entry.last_used >= entry.created_at);
        }

        registry.close(&id1).await;
        registry.close(&id2).await;
    }

    #[tokio::test]
    async fn test_registry_resize() {
        let registry = test_registry();
        let (server, _client) = transport::pair();

        let id = registry
            .open(open_request("s1"), Arc::new(server))
            .await
            .unwrap();

        registry.resize(&id, 132, 50).unwrap();
        assert_eq!(registry.get(&id).unwrap().geometry(), (132, 50));

        let result = registry.resize("missing", 80, 24);
        assert!(matches!(result, Err(SessionError::NotFound(_))));

        registry.close(&id).await;
    }

    #[tokio::test]
    async fn test_sweep_closes_only_stale_sessions() {
        let registry = test_registry();
        let (server1, _client1) = transport::pair();
        let (server2, _client2) = transport::pair();

        let stale_id = registry
            .open(open_request("stale"), Arc::new(server1))
            .await
            .unwrap();
        let fresh_id = registry
            .open(open_request("fresh"), Arc::new(server2))
            .await
            .unwrap();

        // Let both idle well past the threshold (the shell prompt counts
        // as activity shortly after spawn), then refresh one.
        tokio::time::sleep(Duration::from_millis(600)).await;
        registry.get(&fresh_id).unwrap().touch();

        let closed = registry.sweep(Duration::from_millis(250)).await;
        assert_eq!(closed, 1);
        assert!(!registry.contains(&stale_id));
        assert!(registry.contains(&fresh_id));

        registry.close(&fresh_id).await;
    }

    #[tokio::test]
    async fn test_sweep_with_large_threshold_closes_nothing() {
        let registry = test_registry();
        let (server, _client) = transport::pair();

        let id = registry
            .open(open_request("s1"), Arc::new(server))
            .await
            .unwrap();

        let closed = registry.sweep(Duration::from_secs(3600)).await;
        assert_eq!(closed, 0);
        assert!(registry.contains(&id));

        registry.close(&id).await;
    }
}
