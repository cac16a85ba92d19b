//! Diagnostic tracing for the bootstrap.
//!
//! Operator-facing messages (upload progress, startup errors) are printed
//! directly by `main`. Payload output is forwarded as-is. Tracing is for
//! everything else and goes to stderr.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn`, or `debug` when `debug` is set
/// (`--debug` or `INSIGHTS_DEBUG=true`).
///
/// # Example
/// ```bash
/// RUST_LOG=insights_bootstrap=debug insights-client --no-gpg
/// ```
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
