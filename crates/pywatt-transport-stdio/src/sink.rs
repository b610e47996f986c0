use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use pywatt_secrets::{SecretControlSink, SinkError};
use pywatt_wire::{ModuleToOrchestrator, RotationStatus};

use crate::writer::StdioWriter;

/// Binds `SecretClient` to the stdio control channel (spec.md §4.8 step 3:
/// "Construct `SecretClient` bound to stdio").
pub struct StdioSecretSink<W> {
    writer: Arc<StdioWriter<W>>,
}

impl<W: AsyncWrite + Unpin + Send> StdioSecretSink<W> {
    pub fn new(writer: Arc<StdioWriter<W>>) -> Self {
        StdioSecretSink { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + Sync + 'static> SecretControlSink for StdioSecretSink<W> {
    async fn send_get_secret(&self, name: &str) -> Result<(), SinkError> {
        self.writer
            .write_message(&ModuleToOrchestrator::GetSecret { name: name.to_owned() })
            .await
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn send_rotation_ack(&self, rotation_id: &str, status: RotationStatus) -> Result<(), SinkError> {
        self.writer
            .write_message(&ModuleToOrchestrator::RotationAck {
                rotation_id: rotation_id.to_owned(),
                status,
            })
            .await
            .map_err(|e| SinkError(e.to_string()))
    }
}
