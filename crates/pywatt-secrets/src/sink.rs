//! Outbound control-message sink the secret client sends through.
//!
//! The client itself never owns a stdio writer — bootstrap (C8) wires a
//! concrete implementation from `pywatt-transport-stdio` in, keeping this
//! crate transport-agnostic (the same shape would work bound to a socket
//! channel instead, per spec.md's "SecretClient bound to stdio" being one
//! valid binding, not the only one).

use async_trait::async_trait;
use pywatt_wire::RotationStatus;

use crate::error::SinkError;

#[async_trait]
pub trait SecretControlSink: Send + Sync {
    /// Send `GetSecret{name}` to the orchestrator.
    async fn send_get_secret(&self, name: &str) -> Result<(), SinkError>;

    /// Send `RotationAck{rotation_id, status}` to the orchestrator.
    async fn send_rotation_ack(&self, rotation_id: &str, status: RotationStatus) -> Result<(), SinkError>;
}
