//! Logging setup.
//!
//! The terminal core itself only emits `tracing` events; installing a
//! subscriber is left to the hosting process, which calls [`init`] once
//! at startup.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// `level` is the default filter (typically `Config::daemon.log_level`);
/// a `RUST_LOG` environment variable takes precedence when set. Fails if
/// a global subscriber is already installed.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(())
}
