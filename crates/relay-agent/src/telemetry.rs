//! Tracing subscriber setup for integration tests and embedding applications.
//!
//! Library crates in this workspace never install a global subscriber
//! themselves; this helper exists so `tests/integration.rs` and any binary
//! that embeds the agent runtime have one place to wire it up.

use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber::fmt` layer filtered by `RUST_LOG`,
/// falling back to `default_level` when unset. Safe to call more than once
/// per process (later calls are no-ops).
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
