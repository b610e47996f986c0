//! Wire codec for the PyWatt module runtime: typed envelopes, JSON/binary
//! encoding, and length-prefixed framing for stream transports.
//!
//! This is the lowest layer of the stack (component C1) — every other
//! channel crate builds `EncodedMessage`s with this crate and hands them
//! to a transport for delivery.

mod control;
mod descriptors;
mod error;
mod frame;
mod message;

pub use control::{
    AnnounceBlob, EndpointDescriptor, InitBlob, IpcChannelConfig, IpcHttpRequest, IpcHttpResponse,
    ListenAddress, ModuleId, ModuleToOrchestrator, OrchestratorToModule, PortOutcome, RotationStatus,
    RoutedResult, SecretName, SecurityLevel, TcpChannelConfig,
};
pub use descriptors::{ChannelCapabilities, ChannelPreferences, ChannelState, ChannelType};
pub use error::{CodecError, FrameError};
pub use frame::{MAX_FRAME_BYTES, read_frame, write_frame};
pub use message::{EncodedFormat, EncodedMessage, Message, Metadata, decode, encode, encode_payload};
