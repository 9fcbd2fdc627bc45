//! Structured logging bootstrap: plain `tracing`/`tracing-subscriber` log
//! lines to stderr, installed once from `main` before any other work runs.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber. Filter directives come from
/// `THINCI_LOG`, falling back to `RUST_LOG`, falling back to `info`.
pub fn init() {
    let filter = EnvFilter::try_from_env("THINCI_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
