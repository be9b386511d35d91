use tracing_subscriber::EnvFilter;

/// Initializes the tracing subscriber for the process.
///
/// Safe to call multiple times; subsequent calls are no-ops. The filter
/// defaults to the configured log level and can be overridden with
/// `RUST_LOG`.
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
