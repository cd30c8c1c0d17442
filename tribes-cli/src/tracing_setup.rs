//! Tracing setup for the tribes CLI
//!
//! Usage:
//!   tribes --debug monitor                 # Debug logging to console
//!   RUST_LOG=tribes_db=debug tribes check  # Fine-grained log control

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// RUST_LOG wins; otherwise `debug` or `info` depending on the flag
fn env_filter(debug: bool) -> EnvFilter {
    let fallback = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Compact logs on stderr so `check --json` keeps stdout clean.
pub fn init(debug: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(std::io::stderr)
        .with_target(debug)
        .compact()
        .try_init()
        .map_err(|err| anyhow!(err))
}
