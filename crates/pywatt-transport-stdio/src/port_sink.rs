use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use uuid::Uuid;

use pywatt_port::{PortRequestSink, PortSinkError};
use pywatt_wire::ModuleToOrchestrator;

use crate::writer::StdioWriter;

/// Binds `PortNegotiator` to the stdio control channel — port
/// negotiation runs over stdio alongside the secret protocol (spec.md
/// §4.6), not over whichever data channel ends up carrying traffic.
pub struct StdioPortSink<W> {
    writer: Arc<StdioWriter<W>>,
}

impl<W: AsyncWrite + Unpin + Send> StdioPortSink<W> {
    pub fn new(writer: Arc<StdioWriter<W>>) -> Self {
        StdioPortSink { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + Sync + 'static> PortRequestSink for StdioPortSink<W> {
    async fn send_port_request(&self, request_id: Uuid, specific_port: Option<u16>) -> Result<(), PortSinkError> {
        self.writer
            .write_message(&ModuleToOrchestrator::PortRequest { request_id, specific_port })
            .await
            .map_err(|e| PortSinkError(e.to_string()))
    }
}
