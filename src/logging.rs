//! Usage: Structured stdout logging, initialized once at process start.

use tracing_subscriber::EnvFilter;

pub fn init(debug_mode: bool) {
    let default_directive = if debug_mode { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
