use thiserror::Error;

/// Errors raised by the codec and frame layer (component C1).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize payload as {format}: {source}")]
    Serialize {
        format: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to deserialize payload as {format}: {source}")]
    Deserialize {
        format: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("encoded message format ({found:?}) does not match requested format ({expected:?})")]
    FormatMismatch {
        expected: crate::message::EncodedFormat,
        found: crate::message::EncodedFormat,
    },
}

/// Errors raised reading or writing length-prefixed frames on a stream.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {size} bytes exceeds the {limit} byte maximum")]
    FrameTooLarge { size: u64, limit: u64 },

    #[error("zero-length frame is not a valid message")]
    ZeroLengthFrame,

    #[error("stream ended before the frame body was fully read")]
    TruncatedFrame,

    #[error("codec error while framing: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
