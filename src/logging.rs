//! Subscriber setup for binaries. The library itself only emits events.

/// Install a compact subscriber filtered by `env_filter` (e.g. `"info"`).
pub fn setup(env_filter: &str) {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(env_filter)
        .without_time()
        .compact()
        .init();
}

