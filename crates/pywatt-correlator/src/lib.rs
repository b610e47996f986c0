//! Request/response correlator (component C7).
//!
//! Maps outbound request ids to single-shot response slots with
//! deadlines. One `RequestCorrelator<T>` instance correlates exactly one
//! response shape `T` — the port negotiator, the inter-module messaging
//! layer, and the HTTP-over-IPC adapter each own their own instance.

use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Errors a correlated request can resolve with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorrelatorError {
    #[error("no response arrived within the deadline")]
    Timeout,

    #[error("request was cancelled: {0}")]
    Cancelled(String),

    /// A second `register` call used an id already pending. This is a
    /// programmer error (ids must be fresh UUIDs per spec.md §3
    /// invariant): panics in debug builds, returned as an error in release
    /// so a misbehaving caller can't take down the whole process.
    #[error("request id already has a pending slot")]
    DuplicateId,
}

/// Maps `RequestId`s to awaiting response slots.
pub struct RequestCorrelator<T> {
    pending: DashMap<Uuid, oneshot::Sender<Result<T, CorrelatorError>>>,
}

impl<T> Default for RequestCorrelator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestCorrelator<T> {
    pub fn new() -> Self {
        RequestCorrelator {
            pending: DashMap::new(),
        }
    }

    /// Number of requests currently awaiting a response. Exposed for
    /// channel-health reporting and tests, not used for control flow.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl<T: Send + 'static> RequestCorrelator<T> {
    /// Insert a fresh `request_id`'s slot synchronously, before the request
    /// that will eventually be answered goes out. Callers that send a
    /// request and then await its response must call this *before* sending
    /// (spec.md §4.10: "registers a correlator slot, sends..."), so a
    /// response that races the send can't arrive before the slot exists.
    /// Registering an id that already has a pending slot is a programmer
    /// error.
    pub fn insert(&self, request_id: Uuid) -> Result<oneshot::Receiver<Result<T, CorrelatorError>>, CorrelatorError> {
        let (tx, rx) = oneshot::channel();
        match self.pending.entry(request_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                debug_assert!(
                    false,
                    "duplicate correlator registration for request id {request_id}"
                );
                Err(CorrelatorError::DuplicateId)
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Wait on a slot previously created by [`Self::insert`] for `complete`,
    /// `cancel_all`, or the deadline, whichever comes first.
    pub async fn wait(
        &self,
        request_id: Uuid,
        rx: oneshot::Receiver<Result<T, CorrelatorError>>,
        timeout: Duration,
    ) -> Result<T, CorrelatorError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_recv_error)) => {
                // Sender dropped without completing — treat as cancellation
                // rather than resurface a low-level channel error.
                Err(CorrelatorError::Cancelled("response sender dropped".to_owned()))
            }
            Err(_elapsed) => {
                self.pending.remove(&request_id);
                Err(CorrelatorError::Timeout)
            }
        }
    }

    /// Register a fresh `request_id` and wait for `complete`, `cancel_all`,
    /// or the deadline, whichever comes first. Equivalent to `insert` then
    /// `wait`; only safe to use when nothing can complete the request
    /// before this call returns (e.g. in tests that complete it from
    /// another task after this one is already awaiting).
    pub async fn register(&self, request_id: Uuid, timeout: Duration) -> Result<T, CorrelatorError> {
        let rx = self.insert(request_id)?;
        self.wait(request_id, rx, timeout).await
    }

    /// Resolve the slot for `request_id`, if one is still pending. A late
    /// response for an id that already timed out, was cancelled, or was
    /// already completed is silently dropped (spec.md §4.7).
    pub fn complete(&self, request_id: Uuid, result: Result<T, CorrelatorError>) {
        if let Some((_, tx)) = self.pending.remove(&request_id) {
            let _ = tx.send(result);
        }
    }

    /// Resolve every currently pending slot with `Cancelled(reason)`. Used
    /// on shutdown and when a channel transitions to `PermanentlyClosed`.
    pub fn cancel_all(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let ids: Vec<Uuid> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(CorrelatorError::Cancelled(reason.clone())));
            }
        }
    }
}
