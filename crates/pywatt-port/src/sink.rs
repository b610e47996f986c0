use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PortSinkError;

/// Outbound path for `PortRequest` messages. Kept transport-agnostic for
/// the same reason `pywatt-secrets::SecretControlSink` is: the negotiator
/// itself never owns a stdio writer (spec.md §4.6 runs the protocol over
/// stdio, but the seam lets bootstrap wire in whatever concrete transport
/// is live).
#[async_trait]
pub trait PortRequestSink: Send + Sync {
    async fn send_port_request(&self, request_id: Uuid, specific_port: Option<u16>) -> Result<(), PortSinkError>;
}
