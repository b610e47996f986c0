//! Logging setup (spec.md §4.8 step 1, §6): stderr-only, `RUST_LOG`
//! filtered, every formatted line passed through the redaction registry
//! before it leaves the process — mirrors the teacher's
//! `tracing_subscriber::fmt().with_env_filter(...).init()` call in each
//! service's `main`, swapping in a redacting writer instead of plain
//! stderr.

use tracing_subscriber::EnvFilter;

use pywatt_redact::RedactingMakeWriter;

/// Install the process-wide tracing subscriber. Idempotent only in the
/// sense that `tracing_subscriber::fmt().init()` itself is — calling this
/// twice in one process panics, matching the teacher's own assumption
/// that logging is installed exactly once at the top of `main`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingMakeWriter)
        .init();
}
