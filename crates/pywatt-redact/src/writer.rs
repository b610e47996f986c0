//! `tracing_subscriber` writer that pipes every formatted log line through
//! [`crate::redact`] before it reaches stderr.
//!
//! Bootstrap (component C8) installs this as the sole logging sink so
//! "Stdout carries only protocol lines; all human-readable logging is on
//! stderr" and the redaction testable property both hold without every
//! call site having to remember to redact manually.

use std::io;

use tracing_subscriber::fmt::MakeWriter;

use crate::registry::redact;

/// `MakeWriter` that hands out a fresh [`RedactingWriter`] per log event.
#[derive(Clone, Copy, Default)]
pub struct RedactingMakeWriter;

impl<'a> MakeWriter<'a> for RedactingMakeWriter {
    type Writer = RedactingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter { buf: Vec::new() }
    }
}

/// Buffers one event's formatted output, redacts it, and writes the
/// result to stderr when dropped. Buffering (rather than redacting each
/// `write` call) is required because a single log line may arrive across
/// several `write` calls from `tracing_subscriber`'s field formatter.
pub struct RedactingWriter {
    buf: Vec<u8>,
}

impl io::Write for RedactingWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit();
        Ok(())
    }
}

impl RedactingWriter {
    fn emit(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        match std::str::from_utf8(&self.buf) {
            Ok(text) => {
                let redacted = redact(text);
                let _ = io::Write::write_all(&mut io::stderr(), redacted.as_bytes());
            }
            Err(_) => {
                // Non-UTF-8 output can't be scanned for string patterns;
                // pass it through rather than drop it silently.
                let _ = io::Write::write_all(&mut io::stderr(), &self.buf);
            }
        }
        self.buf.clear();
    }
}

impl Drop for RedactingWriter {
    fn drop(&mut self) {
        self.emit();
    }
}
