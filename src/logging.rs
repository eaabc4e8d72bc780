//! Logging bootstrap
//!
//! The engine itself only emits `tracing` events; transport of those events
//! is the embedding application's concern. This helper wires a plain
//! stderr subscriber for binaries and ad-hoc runs.

use tracing_subscriber::EnvFilter;

/// Install a global stderr subscriber honoring `RUST_LOG`.
///
/// Safe to call more than once; subsequent calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
