use std::sync::Arc;

use pywatt_wire::{ChannelState, EncodedMessage, read_frame, write_frame};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::reconnect::ReconnectPolicy;
use crate::stream::{ReadHalf, SocketTarget, WriteHalf};

/// A framed TCP or Unix-domain channel carrying `EncodedMessage`s, with a
/// reconnect policy driving its `ChannelState` (spec.md §4.3).
///
/// The connected stream is split into independent halves on connect: the
/// read half is guarded by its own mutex, separate from the write half's,
/// so a reader blocked in `receive()` waiting on the next inbound frame
/// never holds up a concurrent `send()` (spec.md §5: "each channel owns
/// one reader task and shares a writer protected by a mutex").
pub struct SocketChannel {
    target: SocketTarget,
    policy: ReconnectPolicy,
    state: Mutex<ChannelState>,
    read_half: Mutex<Option<ReadHalf>>,
    write_half: Mutex<Option<WriteHalf>>,
    consecutive_failures: Mutex<u32>,
}

impl SocketChannel {
    pub fn new(target: SocketTarget, policy: ReconnectPolicy) -> Self {
        SocketChannel {
            target,
            policy,
            state: Mutex::new(ChannelState::Disconnected),
            read_half: Mutex::new(None),
            write_half: Mutex::new(None),
            consecutive_failures: Mutex::new(0),
        }
    }

    pub async fn state(&self) -> ChannelState {
        *self.state.lock().await
    }

    async fn set_state(&self, next: ChannelState) {
        let mut state = self.state.lock().await;
        if state.can_transition_to(next) {
            *state = next;
        } else {
            warn!(?state, ?next, "ignoring illegal channel state transition");
        }
    }

    /// Attempt to connect (or reconnect), honoring the configured policy.
    /// Returns once either connected, or the policy's attempts are
    /// exhausted — at which point the channel is `PermanentlyClosed`.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.set_state(ChannelState::Connecting).await;
        let mut attempt = 0;
        loop {
            match self.target.connect().await {
                Ok(stream) => {
                    let (read_half, write_half) = stream.into_split();
                    *self.read_half.lock().await = Some(read_half);
                    *self.write_half.lock().await = Some(write_half);
                    *self.consecutive_failures.lock().await = 0;
                    self.set_state(ChannelState::Connected).await;
                    debug!(attempt, "socket channel connected");
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    warn!(attempt, error = %e, "socket connect failed");
                    if !self.policy.allows_attempt(attempt) {
                        self.set_state(ChannelState::PermanentlyClosed).await;
                        return Err(TransportError::Io(e));
                    }
                    self.set_state(ChannelState::Failed).await;
                    tokio::time::sleep(self.policy.delay_for(attempt - 1)).await;
                    self.set_state(ChannelState::Connecting).await;
                }
            }
        }
    }

    pub async fn send(&self, message: &EncodedMessage) -> Result<(), TransportError> {
        let mut guard = self.write_half.lock().await;
        let Some(write_half) = guard.as_mut() else {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "channel is not connected",
            )));
        };
        match write_frame(write_half, message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                drop(guard);
                self.on_io_failure().await;
                Err(e.into())
            }
        }
    }

    /// Read the next frame. Holds only the read-half mutex, so this can
    /// park indefinitely waiting on the peer without blocking `send`.
    pub async fn receive(&self) -> Result<EncodedMessage, TransportError> {
        let mut guard = self.read_half.lock().await;
        let Some(read_half) = guard.as_mut() else {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "channel is not connected",
            )));
        };
        match read_frame(read_half).await {
            Ok(message) => Ok(message),
            Err(e) => {
                drop(guard);
                self.on_io_failure().await;
                Err(e.into())
            }
        }
    }

    async fn on_io_failure(&self) {
        *self.read_half.lock().await = None;
        *self.write_half.lock().await = None;
        let mut failures = self.consecutive_failures.lock().await;
        *failures += 1;
        self.set_state(ChannelState::Disconnected).await;
    }

    pub async fn disconnect(&self) {
        *self.read_half.lock().await = None;
        *self.write_half.lock().await = None;
        self.set_state(ChannelState::Disconnected).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_send_receive_round_trip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = socket;
            let msg = read_frame(&mut socket).await.unwrap();
            write_frame(&mut socket, &msg).await.unwrap();
        });

        let channel = SocketChannel::new(SocketTarget::Tcp(addr.to_string()), ReconnectPolicy::None);
        channel.connect().await.unwrap();
        assert_eq!(channel.state().await, ChannelState::Connected);

        let encoded = pywatt_wire::encode(&"hello".to_owned(), pywatt_wire::EncodedFormat::Json).unwrap();
        channel.send(&encoded).await.unwrap();
        let echoed = channel.receive().await.unwrap();
        assert_eq!(echoed.bytes, encoded.bytes);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_failure_with_none_policy_permanently_closes() {
        // Port 0 connect attempts to an address nothing listens on.
        let channel = SocketChannel::new(
            SocketTarget::Tcp("127.0.0.1:1".to_owned()),
            ReconnectPolicy::None,
        );
        let result = channel.connect().await;
        assert!(result.is_err());
        assert_eq!(channel.state().await, ChannelState::PermanentlyClosed);
    }

    #[tokio::test]
    async fn send_before_connect_reports_not_connected() {
        let channel = SocketChannel::new(SocketTarget::Tcp("127.0.0.1:0".to_owned()), ReconnectPolicy::None);
        let encoded = pywatt_wire::encode_payload(&"x".to_owned(), pywatt_wire::EncodedFormat::Json).unwrap();
        let result = channel.send(&encoded).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
        let _ = Duration::ZERO;
    }

    #[tokio::test]
    async fn send_does_not_block_while_receive_is_parked_waiting_for_a_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Consume the client's frame so `send` below completes, but
            // never write a response back — the client's `receive` stays
            // parked on the read half for the rest of the test.
            let _ = read_frame(&mut socket).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let channel = Arc::new(SocketChannel::new(SocketTarget::Tcp(addr.to_string()), ReconnectPolicy::None));
        channel.connect().await.unwrap();

        let recv_channel = channel.clone();
        let recv_task = tokio::spawn(async move { recv_channel.receive().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let encoded = pywatt_wire::encode(&"hello".to_owned(), pywatt_wire::EncodedFormat::Json).unwrap();
        let send_result = tokio::time::timeout(Duration::from_secs(1), channel.send(&encoded)).await;
        assert!(send_result.is_ok(), "send should not be blocked by a parked receive()");

        recv_task.abort();
        server.abort();
    }
}
