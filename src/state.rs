//! `AppState` and channel-selection policy (component C11, spec.md §3,
//! §4.11). `AppState<S>` is generic over the caller's opaque user state
//! `S` rather than a boxed `dyn Any` — the natural Rust expression of
//! "owns ... opaque UserState" (spec.md §3).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::io::Stdout;
use tokio::sync::broadcast;
use uuid::Uuid;

use pywatt_correlator::RequestCorrelator;
use pywatt_port::PortNegotiator;
use pywatt_secrets::SecretClient;
use pywatt_transport_socket::SocketChannel;
use pywatt_transport_stdio::StdioWriter;
use pywatt_wire::{
    ChannelPreferences, ChannelState, ChannelType, EncodedFormat, IpcHttpResponse, ModuleId, ModuleToOrchestrator,
};

use crate::channel_health::ChannelHealth;
use crate::http_adapter::{HttpAdapter, HttpResponseSink};

/// Errors from inter-module messaging and channel selection (spec.md
/// §4.10, §4.11).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("target module not found: {0}")]
    TargetNotFound(String),
    #[error("request timed out")]
    Timeout,
    #[error("failed to serialize payload: {0}")]
    Serialization(String),
    #[error("failed to deserialize payload: {0}")]
    Deserialization(String),
    #[error("transport closed")]
    TransportClosed,
    #[error("peer returned an application error: {0}")]
    ApplicationError(String),
    #[error("no channel of the requested type is available")]
    ChannelUnavailable,
    #[error("no channels are available")]
    NoChannelsAvailable,
}

/// Handler for `RoutedModuleMessage`s from a given source module (spec.md
/// §9 design note: "a small interface with a single `handle` method" in
/// place of a dynamic-dispatch callback).
#[async_trait]
pub trait PeerMessageHandler: Send + Sync {
    async fn handle(
        &self,
        source_module_id: ModuleId,
        request_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, String>;
}

/// Which channel an outbound send should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelTarget {
    Auto,
    Specific(ChannelType),
}

const MAX_QUEUED_MESSAGES: usize = 256;

/// Deadline for graceful shutdown before this process hard-exits (spec.md
/// §4.8: "Deadline for graceful shutdown: 5 s; hard-exit after").
const GRACEFUL_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Owns every live channel, the secret client, the correlator, and the
/// peer-handler registry; the single handle the rest of a module's code
/// holds (spec.md §3 "AppState", §4.11).
pub struct AppState<S> {
    module_id: ModuleId,
    orchestrator_api: String,
    user_state: S,
    secrets: Arc<SecretClient>,
    stdio_writer: Arc<StdioWriter<Stdout>>,
    tcp_channel: Option<Arc<SocketChannel>>,
    ipc_channel: Option<Arc<SocketChannel>>,
    port_negotiator: Option<Arc<PortNegotiator>>,
    correlator: Arc<RequestCorrelator<Result<serde_json::Value, String>>>,
    health: DashMap<ChannelType, ChannelHealth>,
    handlers: DashMap<ModuleId, Arc<dyn PeerMessageHandler>>,
    default_handler: RwLock<Option<Arc<dyn PeerMessageHandler>>>,
    preferences: ChannelPreferences,
    pending: Mutex<VecDeque<ModuleToOrchestrator>>,
    shutdown_tx: broadcast::Sender<()>,
    http_adapter: Mutex<Option<Arc<HttpAdapter>>>,
}

impl<S: Send + Sync + 'static> AppState<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        module_id: ModuleId,
        orchestrator_api: String,
        user_state: S,
        secrets: Arc<SecretClient>,
        stdio_writer: Arc<StdioWriter<Stdout>>,
        tcp_channel: Option<Arc<SocketChannel>>,
        ipc_channel: Option<Arc<SocketChannel>>,
        port_negotiator: Option<Arc<PortNegotiator>>,
        correlator: Arc<RequestCorrelator<Result<serde_json::Value, String>>>,
        preferences: ChannelPreferences,
    ) -> Self {
        let health = DashMap::new();
        health.insert(ChannelType::Stdio, ChannelHealth::new(ChannelState::Connected));
        if tcp_channel.is_some() {
            health.insert(ChannelType::Tcp, ChannelHealth::new(ChannelState::Connected));
        }
        if ipc_channel.is_some() {
            health.insert(ChannelType::Ipc, ChannelHealth::new(ChannelState::Connected));
        }
        let (shutdown_tx, _) = broadcast::channel(1);
        AppState {
            module_id,
            orchestrator_api,
            user_state,
            secrets,
            stdio_writer,
            tcp_channel,
            ipc_channel,
            port_negotiator,
            correlator,
            health,
            handlers: DashMap::new(),
            default_handler: RwLock::new(None),
            preferences,
            pending: Mutex::new(VecDeque::new()),
            shutdown_tx,
            http_adapter: Mutex::new(None),
        }
    }

    /// Wire up the HTTP-over-IPC adapter once it exists. Split from
    /// `new` because the adapter's `HttpResponseSink` is `self` — it can
    /// only be built from an `Arc<AppState<S>>` that already exists
    /// (bootstrap constructs the state, wraps it in `Arc`, then builds
    /// and attaches the adapter).
    pub fn attach_http_adapter(&self, adapter: Arc<HttpAdapter>) {
        *self.http_adapter.lock() = Some(adapter);
    }

    pub fn http(&self) -> Option<Arc<HttpAdapter>> {
        self.http_adapter.lock().clone()
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn orchestrator_api(&self) -> &str {
        &self.orchestrator_api
    }

    pub fn secrets(&self) -> &Arc<SecretClient> {
        &self.secrets
    }

    pub fn user_state(&self) -> &S {
        &self.user_state
    }

    pub fn port_negotiator(&self) -> Option<&Arc<PortNegotiator>> {
        self.port_negotiator.as_ref()
    }

    /// Register (or replace) the handler for messages from `source_module_id`.
    pub fn register_handler(&self, source_module_id: ModuleId, handler: Arc<dyn PeerMessageHandler>) {
        self.handlers.insert(source_module_id, handler);
    }

    /// Register a fallback handler used when no source-specific one matches.
    pub fn register_default_handler(&self, handler: Arc<dyn PeerMessageHandler>) {
        *self.default_handler.write() = Some(handler);
    }

    pub(crate) fn handler_for(&self, source_module_id: &str) -> Option<Arc<dyn PeerMessageHandler>> {
        self.handlers
            .get(source_module_id)
            .map(|h| h.clone())
            .or_else(|| self.default_handler.read().clone())
    }

    /// Channels currently usable for sending (spec.md §4.11 `available_channels`).
    pub fn available_channels(&self) -> Vec<ChannelType> {
        self.health
            .iter()
            .filter(|entry| entry.value().is_usable())
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn channel_health(&self, channel: ChannelType) -> Option<ChannelHealth> {
        self.health.get(&channel).map(|entry| *entry)
    }

    pub(crate) fn record_health(&self, channel: ChannelType, state: ChannelState) {
        self.health.entry(channel).or_insert_with(|| ChannelHealth::new(state)).state = state;
    }

    pub(crate) fn record_latency(&self, channel: ChannelType, latency: Duration) {
        if let Some(mut entry) = self.health.get_mut(&channel) {
            entry.record_latency(latency);
        }
    }

    /// Select which channel an outbound message should use (spec.md
    /// §4.11 steps 1-2).
    fn select_channel(&self, target: ChannelTarget) -> Result<ChannelType, MessagingError> {
        let snapshot: Vec<(ChannelType, ChannelHealth)> =
            self.health.iter().map(|entry| (*entry.key(), *entry.value())).collect();
        select_channel_from_snapshot(&snapshot, &self.preferences, target)
    }

    /// Send a control-plane message, selecting a channel per policy and
    /// falling back or queuing per spec.md §4.11 step 3.
    pub async fn send_message(&self, target: ChannelTarget, message: ModuleToOrchestrator) -> Result<(), MessagingError> {
        let primary = match self.select_channel(target) {
            Ok(channel) => channel,
            Err(MessagingError::ChannelUnavailable) if self.preferences.enable_fallback => {
                return self.send_with_fallback(message).await;
            }
            Err(e) => return Err(e),
        };
        match self.send_on_channel(primary, &message).await {
            Ok(()) => Ok(()),
            Err(_) if self.preferences.enable_fallback => self.send_with_fallback(message).await,
            Err(e) => Err(e),
        }
    }

    async fn send_with_fallback(&self, message: ModuleToOrchestrator) -> Result<(), MessagingError> {
        for channel in [ChannelType::Ipc, ChannelType::Tcp, ChannelType::Stdio] {
            if self.channel_health(channel).is_some_and(|h| h.is_usable())
                && self.send_on_channel(channel, &message).await.is_ok()
            {
                return Ok(());
            }
        }
        self.enqueue_pending(message);
        Ok(())
    }

    fn enqueue_pending(&self, message: ModuleToOrchestrator) {
        let mut pending = self.pending.lock();
        if pending.len() >= MAX_QUEUED_MESSAGES {
            pending.pop_front();
        }
        pending.push_back(message);
    }

    /// Drains queued messages onto the first channel that is usable
    /// again. Bootstrap's reconnect loop calls this after a channel
    /// transitions back to `Connected`.
    pub async fn flush_pending(&self) {
        loop {
            let next = {
                let mut pending = self.pending.lock();
                pending.pop_front()
            };
            let Some(message) = next else { return };
            if self.send_message(ChannelTarget::Auto, message.clone()).await.is_err() {
                self.enqueue_pending(message);
                return;
            }
        }
    }

    async fn send_on_channel(&self, channel: ChannelType, message: &ModuleToOrchestrator) -> Result<(), MessagingError> {
        match channel {
            ChannelType::Stdio => self
                .stdio_writer
                .write_message(message)
                .await
                .map_err(|e| MessagingError::Serialization(e.to_string())),
            ChannelType::Tcp | ChannelType::Ipc => {
                let socket = if channel == ChannelType::Tcp { &self.tcp_channel } else { &self.ipc_channel };
                let Some(socket) = socket else { return Err(MessagingError::ChannelUnavailable) };
                let encoded = pywatt_wire::encode(message, EncodedFormat::Json)
                    .map_err(|e| MessagingError::Serialization(e.to_string()))?;
                socket.send(&encoded).await.map_err(|_| MessagingError::TransportClosed)
            }
        }
    }

    /// Send a correlated inter-module request and await the peer's
    /// response (spec.md §4.10 sender side).
    pub async fn send_request(
        &self,
        target_module_id: &str,
        endpoint: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, MessagingError> {
        let request_id = Uuid::new_v4();
        let message = ModuleToOrchestrator::InternalRequest {
            request_id,
            target_module_id: target_module_id.to_owned(),
            endpoint: endpoint.to_owned(),
            payload,
        };

        let correlator = self.correlator.clone();
        let rx = correlator
            .insert(request_id)
            .map_err(|_| MessagingError::Serialization("duplicate request id".to_owned()))?;
        self.send_message(ChannelTarget::Auto, message).await?;
        match correlator.wait(request_id, rx, timeout).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(application_error)) => Err(MessagingError::ApplicationError(application_error)),
            Err(pywatt_correlator::CorrelatorError::Timeout) => Err(MessagingError::Timeout),
            Err(pywatt_correlator::CorrelatorError::Cancelled(_)) => Err(MessagingError::TransportClosed),
            Err(pywatt_correlator::CorrelatorError::DuplicateId) => {
                Err(MessagingError::Serialization("duplicate request id".to_owned()))
            }
        }
    }

    /// Called by the dispatcher when a `RoutedModuleResponse` arrives.
    pub fn complete_request(&self, request_id: Uuid, result: Result<serde_json::Value, String>) {
        self.correlator.complete(request_id, Ok(result));
    }

    /// Subscribe to the process-wide shutdown signal (spec.md §4.8, §5:
    /// "shutdown broadcasts a cancellation signal that every background
    /// task observes on its next await point").
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Begin graceful shutdown: broadcast cancellation and cancel every
    /// pending correlator slot (spec.md §4.8). Also arms a 5 s hard-exit
    /// fallback — if the process is still running once the deadline
    /// passes (a background task stuck past its own cancellation point),
    /// this forces a clean-status exit rather than hanging forever.
    pub fn begin_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.correlator.cancel_all("shutdown");
        tokio::spawn(async {
            tokio::time::sleep(GRACEFUL_SHUTDOWN_DEADLINE).await;
            std::process::exit(crate::error::exit_code::CLEAN_SHUTDOWN);
        });
    }
}

#[async_trait]
impl<S: Send + Sync + 'static> HttpResponseSink for AppState<S> {
    async fn send_http_response(&self, channel: ChannelType, response: IpcHttpResponse) -> Result<(), String> {
        self.send_on_channel(channel, &ModuleToOrchestrator::HttpResponse(response))
            .await
            .map_err(|e| e.to_string())
    }
}

/// Pure channel-selection logic (spec.md §4.11 steps 1-2), factored out
/// of `AppState` so it can be exercised directly against a hand-built
/// health snapshot in tests.
fn select_channel_from_snapshot(
    health: &[(ChannelType, ChannelHealth)],
    preferences: &ChannelPreferences,
    target: ChannelTarget,
) -> Result<ChannelType, MessagingError> {
    let lookup = |kind: ChannelType| health.iter().find(|(k, _)| *k == kind).map(|(_, h)| *h);

    match target {
        ChannelTarget::Specific(kind) => {
            if lookup(kind).is_some_and(|h| h.is_usable()) {
                Ok(kind)
            } else {
                Err(MessagingError::ChannelUnavailable)
            }
        }
        ChannelTarget::Auto => {
            let ipc_ok = preferences.use_ipc && lookup(ChannelType::Ipc).is_some_and(|h| h.is_usable());
            let tcp_ok = preferences.use_tcp && lookup(ChannelType::Tcp).is_some_and(|h| h.is_usable());

            if preferences.prefer_ipc_for_local && ipc_ok {
                return Ok(ChannelType::Ipc);
            }
            if preferences.prefer_tcp_for_remote && tcp_ok {
                return Ok(ChannelType::Tcp);
            }
            match (ipc_ok, tcp_ok) {
                (true, true) => {
                    let ipc_latency = lookup(ChannelType::Ipc).unwrap().mean_latency;
                    let tcp_latency = lookup(ChannelType::Tcp).unwrap().mean_latency;
                    Ok(if ipc_latency <= tcp_latency { ChannelType::Ipc } else { ChannelType::Tcp })
                }
                (true, false) => Ok(ChannelType::Ipc),
                (false, true) => Ok(ChannelType::Tcp),
                (false, false) => {
                    if lookup(ChannelType::Stdio).is_some_and(|h| h.is_usable()) {
                        Ok(ChannelType::Stdio)
                    } else if !health.is_empty() && health.iter().all(|(_, h)| h.state == ChannelState::PermanentlyClosed) {
                        Err(MessagingError::NoChannelsAvailable)
                    } else {
                        Err(MessagingError::ChannelUnavailable)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(kind: ChannelType) -> (ChannelType, ChannelHealth) {
        (kind, ChannelHealth::new(ChannelState::Connected))
    }

    #[test]
    fn explicit_target_honored_when_usable() {
        let health = vec![connected(ChannelType::Tcp)];
        let result = select_channel_from_snapshot(&health, &ChannelPreferences::default(), ChannelTarget::Specific(ChannelType::Tcp));
        assert_eq!(result, Ok(ChannelType::Tcp));
    }

    #[test]
    fn explicit_target_fails_closed_when_unusable() {
        let health = vec![(ChannelType::Tcp, ChannelHealth::new(ChannelState::Disconnected))];
        let result = select_channel_from_snapshot(&health, &ChannelPreferences::default(), ChannelTarget::Specific(ChannelType::Tcp));
        assert_eq!(result, Err(MessagingError::ChannelUnavailable));
    }

    #[test]
    fn auto_prefers_ipc_for_local_when_both_connected() {
        let health = vec![connected(ChannelType::Ipc), connected(ChannelType::Tcp)];
        let prefs = ChannelPreferences { prefer_ipc_for_local: true, prefer_tcp_for_remote: false, ..ChannelPreferences::default() };
        let result = select_channel_from_snapshot(&health, &prefs, ChannelTarget::Auto);
        assert_eq!(result, Ok(ChannelType::Ipc));
    }

    #[test]
    fn auto_falls_back_to_lowest_latency_when_no_preference_matches() {
        let mut ipc_health = ChannelHealth::new(ChannelState::Connected);
        ipc_health.record_latency(Duration::from_millis(50));
        let mut tcp_health = ChannelHealth::new(ChannelState::Connected);
        tcp_health.record_latency(Duration::from_millis(5));
        let health = vec![(ChannelType::Ipc, ipc_health), (ChannelType::Tcp, tcp_health)];
        let prefs = ChannelPreferences { prefer_ipc_for_local: false, prefer_tcp_for_remote: false, ..ChannelPreferences::default() };
        let result = select_channel_from_snapshot(&health, &prefs, ChannelTarget::Auto);
        assert_eq!(result, Ok(ChannelType::Tcp));
    }

    #[test]
    fn auto_falls_back_to_stdio_when_no_socket_channel_usable() {
        let health = vec![connected(ChannelType::Stdio)];
        let result = select_channel_from_snapshot(&health, &ChannelPreferences::default(), ChannelTarget::Auto);
        assert_eq!(result, Ok(ChannelType::Stdio));
    }

    #[test]
    fn all_permanently_closed_reports_no_channels_available() {
        let health = vec![(ChannelType::Stdio, ChannelHealth::new(ChannelState::PermanentlyClosed))];
        let result = select_channel_from_snapshot(&health, &ChannelPreferences::default(), ChannelTarget::Auto);
        assert_eq!(result, Err(MessagingError::NoChannelsAvailable));
    }
}
