//! Tracing initialization, mirroring the teacher's `logger` module: an
//! env-filter driven subscriber so operators control verbosity with
//! `RUST_LOG` without a recompile.

use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. Safe to call at most once per
/// process; subsequent calls are ignored (mirrors `tracing`'s own
/// "already set" semantics rather than panicking the proxy).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
