//! Error types for the protocol crate.

use thiserror::Error;

/// Errors produced while decoding inbound frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Control frame payload was not two positive decimal integers
    /// separated by `;`.
    #[error("malformed resize payload: {0:?}")]
    BadResize(String),
}
