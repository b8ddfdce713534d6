// Logging bootstrap for the agent binary.
//
// Diagnostics always go to stderr: stdout carries the entry point's result.

use tracing_subscriber::EnvFilter;

/// Default filter directive when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

/// Install the global `tracing` subscriber.
///
/// `json` switches from human-readable lines to one JSON object per event.
/// Calling this twice is harmless; the second subscriber is ignored.
pub fn init(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        eprintln!("runtime-agent: logging already initialised: {e}");
    }
}
