//! Byte pumps bridging a PTY and a duplex connection.
//!
//! Each session runs two independent loops. The output pump moves process
//! output to the connection in fixed-size chunks; the input pump moves
//! inbound messages to the PTY, applying in-band resize frames along the
//! way. The loops share no ordering; within each direction, byte order is
//! preserved exactly. The session's connection object is the sole outbound
//! writer, so frames cannot interleave.
//!
//! Every exit path of either pump funnels into [`Registry::close`]; the
//! task wrapper around each pump body is the recovery boundary that turns
//! any failure into "close this session" rather than letting it propagate.
//! A pump blocked on a read is unblocked only by its resource closing
//! (the PTY via process death, the connection via `close`), which surfaces
//! as an error here and feeds the same path.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use protocol::frames::Frame;
use tracing::{debug, warn};

use super::pty::READ_BUFFER_SIZE;
use super::registry::Registry;
use super::Session;

/// Starts the output pump: PTY → connection.
pub(crate) fn spawn_output_pump(
    registry: Arc<Registry>,
    session: Arc<Session>,
    reader: Box<dyn Read + Send>,
) {
    tokio::spawn(async move {
        let reason = pump_output(&session, reader).await;
        debug!(session_id = %session.id(), reason, "output pump stopped");
        registry.close(session.id()).await;
    });
}

/// Starts the input pump: connection → PTY.
pub(crate) fn spawn_input_pump(
    registry: Arc<Registry>,
    session: Arc<Session>,
    writer: Box<dyn Write + Send>,
) {
    tokio::spawn(async move {
        let reason = pump_input(&session, writer).await;
        debug!(session_id = %session.id(), reason, "input pump stopped");
        registry.close(session.id()).await;
    });
}

/// Repeatedly reads process output and forwards it as binary frames.
///
/// Reads block on the blocking pool in [`READ_BUFFER_SIZE`] chunks; each
/// successful read records activity before the bytes go out as a single
/// frame. Returns the reason the pump stopped.
async fn pump_output(session: &Arc<Session>, reader: Box<dyn Read + Send>) -> &'static str {
    let reader = Arc::new(Mutex::new(reader));

    loop {
        if session.signal().is_fired() {
            return "session closing";
        }

        let reader = Arc::clone(&reader);
        let read = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            let mut reader = reader.lock().unwrap();
            reader.read(&mut buf).map(|n| {
                buf.truncate(n);
                buf
            })
        })
        .await;

        match read {
            Ok(Ok(buf)) if buf.is_empty() => return "PTY end of stream",
            Ok(Ok(buf)) => {
                session.touch();
                if let Err(e) = session.connection().send(&buf).await {
                    if !session.signal().is_fired() {
                        warn!(session_id = %session.id(), error = %e, "connection write failed");
                    }
                    return "connection write failed";
                }
            }
            Ok(Err(e)) => {
                if !session.signal().is_fired() {
                    warn!(session_id = %session.id(), error = %e, "PTY read failed");
                }
                return "PTY read failed";
            }
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "PTY read task failed");
                return "read task failed";
            }
        }
    }
}

/// Repeatedly reads one inbound message, classifies it, and applies it.
///
/// Resize control frames go through the session's tolerant resize path;
/// data frames are written to the PTY verbatim; malformed control frames
/// are dropped without disturbing the session. Returns the reason the
/// pump stopped.
async fn pump_input(session: &Arc<Session>, mut writer: Box<dyn Write + Send>) -> &'static str {
    loop {
        if session.signal().is_fired() {
            return "session closing";
        }

        let msg = match session.connection().recv().await {
            Ok(Some(msg)) => msg,
            Ok(None) => return "connection closed by peer",
            Err(e) => {
                if !session.signal().is_fired() {
                    warn!(session_id = %session.id(), error = %e, "connection read failed");
                }
                return "connection read failed";
            }
        };

        session.touch();

        match Frame::decode(&msg) {
            Ok(Frame::Resize { cols, rows }) => {
                if let Err(e) = session.resize(cols, rows) {
                    warn!(session_id = %session.id(), cols, rows, error = %e, "resize failed");
                }
            }
            Ok(Frame::Data(data)) => {
                if let Err(e) = writer.write_all(data).and_then(|_| writer.flush()) {
                    if !session.signal().is_fired() {
                        warn!(session_id = %session.id(), error = %e, "PTY write failed");
                    }
                    return "PTY write failed";
                }
            }
            Err(e) => {
                debug!(session_id = %session.id(), error = %e, "dropping malformed control frame");
            }
        }
    }
}
