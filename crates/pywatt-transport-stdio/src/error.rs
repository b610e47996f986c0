use thiserror::Error;

/// Failures writing a control message out over the stdio transport.
#[derive(Debug, Error)]
pub enum StdioError {
    #[error("failed to serialize control message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("stdio write failed: {0}")]
    Io(#[from] std::io::Error),
}
