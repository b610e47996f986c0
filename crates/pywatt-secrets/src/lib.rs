//! Secret client (component C4): request, cache, and refresh secrets from
//! the orchestrator; rotation events; redaction registration on fetch.

mod client;
mod error;
mod sink;

pub use client::{GetMode, RotationEvent, Secret, SecretClient};
pub use error::{SecretError, SinkError};
pub use sink::SecretControlSink;
