//! Process-global redaction registry (component C5) and its logging
//! integration. See `registry` for the scan/replace primitives and
//! `writer` for the `tracing_subscriber` glue that scrubs stderr.

mod registry;
mod writer;

pub use registry::{redact, register, unregister};
pub use writer::{RedactingMakeWriter, RedactingWriter};

#[cfg(any(test, feature = "test-support"))]
pub use registry::clear_for_tests;
