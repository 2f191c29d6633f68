//! # WebTerm Terminal Core
//!
//! This crate implements the interactive remote-terminal subsystem of the
//! WebTerm panel: for each client it spawns a shell bound to a
//! pseudo-terminal, bridges bytes both ways between that shell and a
//! persistent duplex connection, interprets in-band resize control frames,
//! and manages the concurrent lifecycle of many such sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Session Registry                     │
//! │      create / lookup / list / remove / stale sweep      │
//! ├─────────────────────────────────────────────────────────┤
//! │  per session:                                           │
//! │                                                         │
//! │   PTY ──output pump──▶ Duplex connection                │
//! │   PTY ◀──input pump─── Duplex connection (+ resize)     │
//! │   shell process ──exit watcher──▶ close                 │
//! │                                                         │
//! │   one-shot close signal → teardown exactly once         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The transport/auth layer is an external collaborator: it upgrades and
//! authenticates the connection, validates the initial geometry, and hands
//! this crate a [`transport::Duplex`] object. The core never listens on a
//! socket and never authenticates a caller itself.
//!
//! ## Modules
//!
//! - [`config`]: TOML configuration loading, validation, and defaults
//! - [`logging`]: tracing subscriber setup
//! - [`transport`]: the duplex connection abstraction and an in-memory pair
//! - [`session`]: PTY hosting, the duplex bridge, lifecycle, and the registry

pub mod config;
pub mod logging;
pub mod session;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export session types for convenience
pub use session::{CloseSignal, Registry, Session, SessionError, SessionId};

// Re-export transport types for convenience
pub use transport::{Duplex, MemoryDuplex, TransportError};
