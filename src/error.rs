//! Top-level error type and exit-code mapping (spec.md §6, §7).
//!
//! Every component keeps its own error enum (`SecretError`, `PortError`,
//! `TransportError`, `CorrelatorError`, ...); this type is only what
//! bootstrap needs to decide whether a failure is fatal and, if so, which
//! exit code to use. Nothing downstream of bootstrap should need to match
//! on this type directly.

use thiserror::Error;

/// Errors that can terminate the bootstrap sequence (spec.md §4.8, §7).
#[derive(Debug, Error)]
pub enum Error {
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("required channel unavailable: {0}")]
    RequiredChannelFailed(String),

    #[error("no channels available")]
    NoChannelsAvailable,

    #[error("failed to emit announcement: {0}")]
    AnnouncementFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Process exit codes (spec.md §6).
pub mod exit_code {
    pub const CLEAN_SHUTDOWN: i32 = 0;
    pub const HANDSHAKE_FAILED: i32 = 64;
    pub const REQUIRED_CHANNEL_UNAVAILABLE: i32 = 65;
    pub const ANNOUNCEMENT_FAILED: i32 = 66;
    pub const UNHANDLED_INTERNAL_ERROR: i32 = 70;
}

impl Error {
    /// The exit code bootstrap should use when this error terminates the
    /// process, centralizing the mapping spec.md §6 documents so no call
    /// site has to hand-pick a code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::HandshakeFailed(_) => exit_code::HANDSHAKE_FAILED,
            Error::RequiredChannelFailed(_) | Error::NoChannelsAvailable => {
                exit_code::REQUIRED_CHANNEL_UNAVAILABLE
            }
            Error::AnnouncementFailed(_) => exit_code::ANNOUNCEMENT_FAILED,
            Error::Internal(_) => exit_code::UNHANDLED_INTERNAL_ERROR,
        }
    }
}
