//! Socket transports (component C3): framed TCP and Unix-domain channels
//! carrying `EncodedMessage`s, with a reconnect policy driving channel
//! state.

mod channel;
mod error;
mod reconnect;
mod stream;

pub use channel::SocketChannel;
pub use error::TransportError;
pub use reconnect::ReconnectPolicy;
pub use stream::SocketTarget;
