use thiserror::Error;

/// Error taxonomy for the secret client (spec.md §7 "Secret").
#[derive(Debug, Error, Clone)]
pub enum SecretError {
    #[error("secret {0:?} not found in cache")]
    NotFound(String),

    #[error("no response arrived within the deadline")]
    Timeout,

    #[error("failed to parse secret value as the requested type: {0}")]
    Parse(String),

    #[error("transport error while fetching secret: {0}")]
    Transport(String),
}

/// Error sending a control message out over whichever channel the secret
/// client is bound to.
#[derive(Debug, Error, Clone)]
#[error("failed to send control message: {0}")]
pub struct SinkError(pub String);
