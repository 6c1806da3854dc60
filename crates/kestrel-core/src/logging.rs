//! Tracing subscriber setup.
//!
//! The client logs to stderr only; there is no local persistence. Log context
//! (session ID, component) is attached via tracing fields at call sites.

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
/// `RUST_LOG` takes precedence over the provided level.
///
/// # Arguments
///
/// * `level` - Minimum log level to display, e.g. `"info"`.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init is a no-op if a subscriber is already installed
    let _ = subscriber.try_init();
}
