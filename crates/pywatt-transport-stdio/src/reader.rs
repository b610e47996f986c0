use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::warn;

use pywatt_wire::OrchestratorToModule;

/// Reads one `OrchestratorToModule` per line from `R`.
///
/// A malformed line is logged and skipped rather than surfaced as an
/// error (spec.md §4.2) — this is how the module tolerates orchestrator
/// versions that add control-message variants it doesn't know yet.
pub struct StdioReader<R> {
    lines: tokio::io::Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> StdioReader<R> {
    pub fn new(inner: R) -> Self {
        StdioReader { lines: BufReader::new(inner).lines() }
    }

    /// Returns the next parsed message, or `None` once the underlying
    /// stream has closed (the orchestrator's end of stdin went away).
    pub async fn next_message(&mut self) -> Option<OrchestratorToModule> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "stdio read error, treating as closed");
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<OrchestratorToModule>(&line) {
                Ok(message) => return Some(message),
                Err(e) => {
                    warn!(error = %e, line, "skipping malformed control message");
                    continue;
                }
            }
        }
    }
}
