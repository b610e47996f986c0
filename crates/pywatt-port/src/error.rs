use thiserror::Error;

/// Failures negotiating a port (spec.md §4.6, §7 "Port").
#[derive(Debug, Error, Clone)]
pub enum PortError {
    #[error("orchestrator denied the port request: {0}")]
    Denied(String),

    #[error("port negotiation timed out")]
    Timeout,

    #[error("failed to send port request: {0}")]
    Transport(String),

    #[error("no bindable fallback port found in the dynamic range")]
    NoBindablePortFound,
}

/// Error sending a `PortRequest` out over whichever channel the
/// negotiator is bound to.
#[derive(Debug, Error, Clone)]
#[error("failed to send port request: {0}")]
pub struct PortSinkError(pub String);
