//! Tracing setup for host processes.
//!
//! The library itself only emits `tracing` events; a host calls `init()`
//! once at startup. Filtering comes from `RUST_LOG` (default `info`).

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Safe to call once per process; a second
/// call is a no-op (the existing subscriber wins).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
