use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use pywatt_wire::{AnnounceBlob, ModuleToOrchestrator};

use crate::error::StdioError;

/// Serializes `ModuleToOrchestrator` messages one per line onto `W`.
///
/// The transport is exclusive (spec.md §4.2): once constructed over the
/// process's real stdout, no other code may write to it. Guarded by a
/// single mutex so writers on different tasks never interleave a partial
/// line (spec.md §4.11's "no operation holds a lock across suspension
/// except the stdout-write mutex, which is released before awaiting
/// anything else" — the lock here is held only across the write+flush).
pub struct StdioWriter<W> {
    inner: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> StdioWriter<W> {
    pub fn new(inner: W) -> Self {
        StdioWriter { inner: Mutex::new(inner) }
    }

    pub async fn write_message(&self, message: &ModuleToOrchestrator) -> Result<(), StdioError> {
        self.write_line(message).await
    }

    /// Write the one-time announcement directly, bypassing
    /// `ModuleToOrchestrator` entirely. spec.md §3 documents `AnnounceBlob`
    /// as its own top-level shape distinct from the tagged control-message
    /// union, and §8 scenario 1 expects the stdout line to parse straight
    /// as `AnnounceBlob` with no wrapper key at all.
    pub async fn write_announcement(&self, blob: &AnnounceBlob) -> Result<(), StdioError> {
        self.write_line(blob).await
    }

    async fn write_line<T: Serialize>(&self, value: &T) -> Result<(), StdioError> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let mut guard = self.inner.lock().await;
        guard.write_all(line.as_bytes()).await?;
        guard.flush().await?;
        Ok(())
    }
}
