//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_DIRECTIVE: &str = "info";

/// Build the filter: `RUST_LOG` when set and valid, else `fallback`.
pub fn filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the JSON subscriber (timestamps, no targets).
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(fallback: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(fallback))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
