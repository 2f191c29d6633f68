//! Messages exchanged with the caller-facing transport layer.
//!
//! The HTTP/auth layer decodes these at its edge, performs the connection
//! upgrade and authentication, and hands the terminal core an established
//! duplex channel plus validated geometry. The core itself never parses
//! transport payloads other than the in-band frames in [`crate::frames`].

use serde::{Deserialize, Serialize};

/// Request to open a new terminal session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOpen {
    /// Caller-chosen session identifier; a fresh one is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Shell to run; the configured default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Initial terminal width in columns.
    pub cols: u16,
    /// Initial terminal height in rows.
    pub rows: u16,
}

impl Default for SessionOpen {
    fn default() -> Self {
        Self {
            session_id: None,
            shell: None,
            cols: 80,
            rows: 24,
        }
    }
}

/// One entry in a session-list response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    /// Unique session identifier.
    pub id: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Time of the most recent byte transfer in either direction,
    /// milliseconds since the Unix epoch.
    pub last_used: u64,
}

/// Request to close a session.
///
/// Closing an unknown id is not an error at this layer; the caller-facing
/// API decides how to surface it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClose {
    /// Session identifier to tear down.
    pub id: String,
}
