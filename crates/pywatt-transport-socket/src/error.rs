use thiserror::Error;

/// Transport-level failure kinds (spec.md §4.3, §7 `Transport(kind)`).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("operation timed out")]
    Timeout,

    #[error("peer closed the connection")]
    Eof,

    #[error("tls error: {0}")]
    Tls(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message exceeds the maximum frame size")]
    FrameTooLarge,
}

impl From<pywatt_wire::FrameError> for TransportError {
    fn from(e: pywatt_wire::FrameError) -> Self {
        match e {
            pywatt_wire::FrameError::Io(io) => classify_io(io),
            pywatt_wire::FrameError::TruncatedFrame => TransportError::Eof,
            pywatt_wire::FrameError::FrameTooLarge { .. } => TransportError::FrameTooLarge,
            pywatt_wire::FrameError::ZeroLengthFrame | pywatt_wire::FrameError::Codec(_) => {
                TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            }
        }
    }
}

fn classify_io(io: std::io::Error) -> TransportError {
    match io.kind() {
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
            TransportError::ConnectionReset
        }
        std::io::ErrorKind::TimedOut => TransportError::Timeout,
        std::io::ErrorKind::UnexpectedEof => TransportError::Eof,
        _ => TransportError::Io(io),
    }
}
