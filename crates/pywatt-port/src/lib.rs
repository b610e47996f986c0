//! Port negotiator (component C6): request a TCP port from the
//! orchestrator with timeout, retry, circuit breaker, and a bindable
//! fallback range.

mod breaker;
mod error;
mod negotiator;
mod sink;

pub use error::{PortError, PortSinkError};
pub use negotiator::{NegotiatedPort, PortNegotiator, port_from_env};
pub use sink::PortRequestSink;
