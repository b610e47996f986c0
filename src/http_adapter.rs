//! HTTP-over-IPC adapter (component C9, spec.md §4.9).
//!
//! Inbound `IpcHttpRequest` frames are pushed onto a bounded queue
//! (capacity 1,024, spec.md §5) that the user's router glue drains;
//! outbound `IpcHttpResponse`s are written back on the channel the
//! request arrived on, with the documented 50/150/450 ms retry policy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use pywatt_wire::{ChannelType, IpcHttpRequest, IpcHttpResponse};

/// Default bounded-queue capacity shared by every channel's task
/// communication (spec.md §5).
pub const QUEUE_CAPACITY: usize = 1_024;
/// How long a full queue blocks a producer before reporting backpressure
/// (spec.md §5).
const BACKPRESSURE_DEADLINE: Duration = Duration::from_millis(100);
const RETRY_BACKOFF: [Duration; 3] = [Duration::from_millis(50), Duration::from_millis(150), Duration::from_millis(450)];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpAdapterError {
    #[error("inbound queue is full")]
    Backpressure,
    #[error("no request is pending with that id")]
    UnknownRequestId,
    #[error("response write failed after retrying: {0}")]
    Lost(String),
}

/// Seam the adapter writes responses through; `AppState` is the real
/// implementation, routing `HttpResponse` over whichever channel the
/// request arrived on (spec.md §9 OQ1's `select_inbound_channel`).
#[async_trait]
pub trait HttpResponseSink: Send + Sync {
    async fn send_http_response(&self, channel: ChannelType, response: IpcHttpResponse) -> Result<(), String>;
}

/// Counters and rolling latency mean the adapter owns (spec.md §4.9
/// "responsibility of the adapter, not the user code").
#[derive(Debug)]
pub struct HttpMetrics {
    requests_received: AtomicU64,
    responses_sent: AtomicU64,
    errors: AtomicU64,
    mean_latency_micros: Mutex<f64>,
}

impl Default for HttpMetrics {
    fn default() -> Self {
        HttpMetrics {
            requests_received: AtomicU64::new(0),
            responses_sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            mean_latency_micros: Mutex::new(0.0),
        }
    }
}

/// A read-only snapshot of `HttpMetrics`, for the API surface spec.md
/// §4.9 says metrics must be "observable through."
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HttpMetricsSnapshot {
    pub requests_received: u64,
    pub responses_sent: u64,
    pub errors: u64,
    pub mean_latency: Duration,
}

impl HttpMetrics {
    fn record_latency(&self, observed: Duration) {
        const ALPHA: f64 = 0.2;
        let mut mean = self.mean_latency_micros.lock();
        let observed_micros = observed.as_micros() as f64;
        *mean = if *mean == 0.0 { observed_micros } else { *mean + ALPHA * (observed_micros - *mean) };
    }

    pub fn snapshot(&self) -> HttpMetricsSnapshot {
        HttpMetricsSnapshot {
            requests_received: self.requests_received.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            mean_latency: Duration::from_micros(*self.mean_latency_micros.lock() as u64),
        }
    }
}

struct PendingRequest {
    origin: ChannelType,
    received_at: Instant,
}

/// Owns the inbound queue, the origin-channel map, and the metrics for
/// the HTTP-over-IPC tunnel.
pub struct HttpAdapter {
    sink: std::sync::Arc<dyn HttpResponseSink>,
    inbound_tx: mpsc::Sender<IpcHttpRequest>,
    inbound_rx: Mutex<Option<mpsc::Receiver<IpcHttpRequest>>>,
    pending: DashMap<Uuid, PendingRequest>,
    metrics: HttpMetrics,
}

impl HttpAdapter {
    pub fn new(sink: std::sync::Arc<dyn HttpResponseSink>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        HttpAdapter {
            sink,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            pending: DashMap::new(),
            metrics: HttpMetrics::default(),
        }
    }

    /// Hand the receiving end to the user's router glue. Returns `None`
    /// if already taken — there is exactly one subscriber per adapter.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<IpcHttpRequest>> {
        self.inbound_rx.lock().take()
    }

    pub fn metrics(&self) -> HttpMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Called by a channel's background loop when an `IpcHttpRequest`
    /// frame arrives on `channel`.
    pub async fn dispatch_inbound(&self, channel: ChannelType, request: IpcHttpRequest) -> Result<(), HttpAdapterError> {
        self.metrics.requests_received.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(request.request_id, PendingRequest { origin: channel, received_at: Instant::now() });

        match self.inbound_tx.try_send(request) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(request)) => {
                match tokio::time::timeout(BACKPRESSURE_DEADLINE, self.inbound_tx.send(request)).await {
                    Ok(Ok(())) => Ok(()),
                    _ => {
                        self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                        Err(HttpAdapterError::Backpressure)
                    }
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                Err(HttpAdapterError::Backpressure)
            }
        }
    }

    /// Write `response` back on the channel its request arrived on,
    /// retrying transient I/O failures up to 3 times with 50/150/450 ms
    /// backoff (spec.md §4.9).
    pub async fn respond(&self, response: IpcHttpResponse) -> Result<(), HttpAdapterError> {
        let Some((_, pending)) = self.pending.remove(&response.request_id) else {
            return Err(HttpAdapterError::UnknownRequestId);
        };

        let mut last_error = String::new();
        for attempt in 0..=RETRY_BACKOFF.len() {
            match self.sink.send_http_response(pending.origin, response.clone()).await {
                Ok(()) => {
                    self.metrics.responses_sent.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_latency(pending.received_at.elapsed());
                    return Ok(());
                }
                Err(e) => {
                    last_error = e;
                    if attempt < RETRY_BACKOFF.len() {
                        warn!(attempt, error = %last_error, "http response write failed, retrying");
                        tokio::time::sleep(RETRY_BACKOFF[attempt]).await;
                    }
                }
            }
        }
        self.metrics.errors.fetch_add(1, Ordering::Relaxed);
        Err(HttpAdapterError::Lost(last_error))
    }
}

/// Which channel should own a fresh inbound `HttpRequest` dispatch when
/// more than one is live (spec.md §9 OQ1, resolved in SPEC_FULL.md): the
/// TCP channel is authoritative when `tcp_channel.required`, otherwise
/// the same preference order §4.11 defines for outbound sends.
pub fn select_inbound_channel(
    tcp_required: bool,
    live_channels: &HashMap<ChannelType, bool>,
) -> Option<ChannelType> {
    if tcp_required && live_channels.get(&ChannelType::Tcp).copied().unwrap_or(false) {
        return Some(ChannelType::Tcp);
    }
    for candidate in [ChannelType::Ipc, ChannelType::Tcp, ChannelType::Stdio] {
        if live_channels.get(&candidate).copied().unwrap_or(false) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    struct RecordingSink {
        sent: AsyncMutex<Vec<(ChannelType, Uuid)>>,
        fail_n_times: AsyncMutex<u32>,
    }

    #[async_trait]
    impl HttpResponseSink for RecordingSink {
        async fn send_http_response(&self, channel: ChannelType, response: IpcHttpResponse) -> Result<(), String> {
            let mut remaining = self.fail_n_times.lock().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err("transient".to_owned());
            }
            self.sent.lock().await.push((channel, response.request_id));
            Ok(())
        }
    }

    fn sample_request() -> IpcHttpRequest {
        IpcHttpRequest {
            request_id: Uuid::new_v4(),
            method: "GET".to_owned(),
            uri: "/health".to_owned(),
            headers: HashMap::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn dispatch_then_respond_round_trips_through_the_adapter() {
        let sink = Arc::new(RecordingSink { sent: AsyncMutex::new(vec![]), fail_n_times: AsyncMutex::new(0) });
        let adapter = HttpAdapter::new(sink.clone());
        let mut rx = adapter.take_receiver().unwrap();

        let request = sample_request();
        let request_id = request.request_id;
        adapter.dispatch_inbound(ChannelType::Ipc, request).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.request_id, request_id);

        let response = IpcHttpResponse { request_id, status_code: 200, headers: HashMap::new(), body: Some(b"ok".to_vec()) };
        adapter.respond(response).await.unwrap();

        assert_eq!(sink.sent.lock().await.as_slice(), &[(ChannelType::Ipc, request_id)]);
        let metrics = adapter.metrics();
        assert_eq!(metrics.requests_received, 1);
        assert_eq!(metrics.responses_sent, 1);
        assert_eq!(metrics.errors, 0);
    }

    #[tokio::test]
    async fn respond_with_unknown_request_id_is_reported() {
        let sink = Arc::new(RecordingSink { sent: AsyncMutex::new(vec![]), fail_n_times: AsyncMutex::new(0) });
        let adapter = HttpAdapter::new(sink);
        let response = IpcHttpResponse { request_id: Uuid::new_v4(), status_code: 200, headers: HashMap::new(), body: None };
        let result = adapter.respond(response).await;
        assert_eq!(result, Err(HttpAdapterError::UnknownRequestId));
    }

    #[tokio::test]
    async fn transient_write_failures_are_retried_then_succeed() {
        let sink = Arc::new(RecordingSink { sent: AsyncMutex::new(vec![]), fail_n_times: AsyncMutex::new(2) });
        let adapter = HttpAdapter::new(sink.clone());
        let request = sample_request();
        let request_id = request.request_id;
        adapter.dispatch_inbound(ChannelType::Tcp, request).await.unwrap();

        let response = IpcHttpResponse { request_id, status_code: 200, headers: HashMap::new(), body: None };
        adapter.respond(response).await.unwrap();
        assert_eq!(sink.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn exhausting_all_retries_records_an_error_and_reports_lost() {
        let sink = Arc::new(RecordingSink { sent: AsyncMutex::new(vec![]), fail_n_times: AsyncMutex::new(10) });
        let adapter = HttpAdapter::new(sink);
        let request = sample_request();
        let request_id = request.request_id;
        adapter.dispatch_inbound(ChannelType::Stdio, request).await.unwrap();

        let response = IpcHttpResponse { request_id, status_code: 200, headers: HashMap::new(), body: None };
        let result = adapter.respond(response).await;
        assert!(matches!(result, Err(HttpAdapterError::Lost(_))));
        assert_eq!(adapter.metrics().errors, 1);
    }

    #[test]
    fn select_inbound_channel_prefers_tcp_when_required() {
        let mut live = HashMap::new();
        live.insert(ChannelType::Tcp, true);
        live.insert(ChannelType::Ipc, true);
        assert_eq!(select_inbound_channel(true, &live), Some(ChannelType::Tcp));
    }

    #[test]
    fn select_inbound_channel_prefers_ipc_when_tcp_not_required() {
        let mut live = HashMap::new();
        live.insert(ChannelType::Tcp, true);
        live.insert(ChannelType::Ipc, true);
        assert_eq!(select_inbound_channel(false, &live), Some(ChannelType::Ipc));
    }
}
