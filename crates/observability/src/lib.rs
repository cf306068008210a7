//! Tracing/logging setup shared by binaries embedding the engine.
//!
//! Libraries in this workspace only emit `tracing` events; installing a
//! subscriber is left to the process entry point.

/// Initialize process-wide tracing with the default `info` filter.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::DEFAULT_DIRECTIVE);
}

/// Like [`init`], with `directive` used when `RUST_LOG` is unset or invalid.
pub fn init_with_default(directive: &str) {
    tracing::init(directive);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
