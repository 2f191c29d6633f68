//! PTY process hosting.
//!
//! Spawns a shell attached to a pseudo-terminal with a given initial
//! geometry and applies later resize requests. A session's process handle
//! is split at spawn time: the child itself goes to the exit watcher's
//! blocking `wait`, while a cloned kill handle stays with the session for
//! teardown.

use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

use super::SessionError;

/// Buffer size for reading process output.
pub(crate) const READ_BUFFER_SIZE: usize = 4096;

/// Resources produced by a successful spawn.
pub struct SpawnedPty {
    /// PTY master handle; used for resize, closed at teardown.
    pub master: Box<dyn MasterPty + Send>,
    /// Reader over process output.
    pub reader: Box<dyn Read + Send>,
    /// Writer into process input.
    pub writer: Box<dyn Write + Send>,
    /// The shell process.
    pub child: Box<dyn Child + Send + Sync>,
    /// Kill handle usable while `child` is parked in the exit watcher.
    pub killer: Box<dyn ChildKiller + Send + Sync>,
    /// Process id, when the platform exposes one.
    pub pid: Option<u32>,
}

/// Spawns a shell on a fresh PTY with the given geometry.
///
/// The command inherits the parent environment augmented with the
/// terminal-type variables interactive programs expect, plus any extra
/// `env` entries.
pub fn spawn(
    shell: Option<&str>,
    env: Vec<(String, String)>,
    cols: u16,
    rows: u16,
) -> Result<SpawnedPty, SessionError> {
    let shell = resolve_shell(shell);

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

    let mut cmd = CommandBuilder::new(&shell);
    cmd.env("TERM", "xterm-256color");
    cmd.env("COLORTERM", "truecolor");
    for (key, value) in env {
        cmd.env(key, value);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

    let killer = child.clone_killer();
    let pid = child.process_id();

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

    Ok(SpawnedPty {
        master: pair.master,
        reader,
        writer,
        child,
        killer,
        pid,
    })
}

/// Applies new geometry to a PTY master.
///
/// Zero dimensions are ignored without error; returns `true` when the
/// resize was applied, `false` when it was ignored.
pub fn resize(master: &(dyn MasterPty + Send), cols: u16, rows: u16) -> Result<bool, SessionError> {
    if cols == 0 || rows == 0 {
        return Ok(false);
    }

    master
        .resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;

    Ok(true)
}

/// Resolves the shell to run.
///
/// Order of preference: the explicit request, the `$SHELL` environment
/// variable, `/bin/sh`.
pub fn resolve_shell(shell: Option<&str>) -> String {
    match shell {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()),
    }
}
