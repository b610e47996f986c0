//! Stdio IPC transport (component C2): line-delimited JSON control plane
//! carried over stdin/stdout.

mod error;
mod port_sink;
mod reader;
mod sink;
mod writer;

pub use error::StdioError;
pub use port_sink::StdioPortSink;
pub use reader::StdioReader;
pub use sink::StdioSecretSink;
pub use writer::StdioWriter;

#[cfg(test)]
mod tests {
    use super::*;
    use pywatt_wire::{ModuleToOrchestrator, OrchestratorToModule, RotationStatus};
    use std::sync::Arc;

    #[tokio::test]
    async fn writer_emits_one_newline_terminated_json_line() {
        let (client, mut server) = tokio::io::duplex(4096);
        let writer = StdioWriter::new(client);
        writer
            .write_message(&ModuleToOrchestrator::GetSecret { name: "DATABASE_URL".to_owned() })
            .await
            .unwrap();

        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; 256];
        let n = server.read(&mut buf).await.unwrap();
        let line = String::from_utf8(buf[..n].to_owned()).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let parsed: ModuleToOrchestrator = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed, ModuleToOrchestrator::GetSecret { name: "DATABASE_URL".to_owned() });
    }

    #[tokio::test]
    async fn reader_skips_malformed_lines_and_keeps_going() {
        let (mut client, server) = tokio::io::duplex(4096);
        use tokio::io::AsyncWriteExt;
        client
            .write_all(b"not json at all\n\"Heartbeat\"\n")
            .await
            .unwrap();
        drop(client);

        let mut reader = StdioReader::new(server);
        let msg = reader.next_message().await.unwrap();
        assert_eq!(msg, OrchestratorToModule::Heartbeat);
        assert!(reader.next_message().await.is_none());
    }

    #[tokio::test]
    async fn reader_returns_none_on_closed_stream() {
        let (client, server) = tokio::io::duplex(4096);
        drop(client);
        let mut reader = StdioReader::new(server);
        assert!(reader.next_message().await.is_none());
    }

    #[tokio::test]
    async fn reader_ignores_blank_lines() {
        let (mut client, server) = tokio::io::duplex(4096);
        use tokio::io::AsyncWriteExt;
        client.write_all(b"\n\n\"Shutdown\"\n").await.unwrap();
        drop(client);

        let mut reader = StdioReader::new(server);
        assert_eq!(reader.next_message().await.unwrap(), OrchestratorToModule::Shutdown);
    }

    #[tokio::test]
    async fn secret_sink_sends_get_secret_and_rotation_ack() {
        let (client, server) = tokio::io::duplex(4096);
        let writer = Arc::new(StdioWriter::new(client));
        let sink = StdioSecretSink::new(writer);

        sink.send_get_secret("API_KEY").await.unwrap();
        sink.send_rotation_ack("r1", RotationStatus::Ok).await.unwrap();

        use tokio::io::{AsyncBufReadExt, BufReader};
        let mut lines = BufReader::new(server).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        assert!(first.contains("\"GetSecret\""));
        let second = lines.next_line().await.unwrap().unwrap();
        assert!(second.contains("\"RotationAck\""));
    }
}
