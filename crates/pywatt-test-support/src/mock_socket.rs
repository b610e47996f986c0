use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use pywatt_wire::{EncodedMessage, FrameError, read_frame, write_frame};

/// A TCP listener standing in for the orchestrator's socket channel
/// endpoint in tests.
pub struct MockSocketServer {
    listener: TcpListener,
}

impl MockSocketServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(MockSocketServer { listener })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr().expect("bound listener has a local address")
    }

    pub async fn accept(&self) -> std::io::Result<MockSocketConnection> {
        let (stream, _) = self.listener.accept().await?;
        Ok(MockSocketConnection { stream })
    }
}

/// One end of a framed TCP connection, used by both the mock server and
/// test clients that connect to a real `SocketChannel`.
pub struct MockSocketConnection {
    stream: TcpStream,
}

impl MockSocketConnection {
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(MockSocketConnection { stream })
    }

    pub async fn send(&mut self, message: &EncodedMessage) -> Result<(), FrameError> {
        write_frame(&mut self.stream, message).await
    }

    pub async fn recv(&mut self) -> Result<EncodedMessage, FrameError> {
        read_frame(&mut self.stream).await
    }
}
