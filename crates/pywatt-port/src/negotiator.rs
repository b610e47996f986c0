use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::TcpListener;
use tracing::{debug, warn};
use uuid::Uuid;

use pywatt_correlator::RequestCorrelator;
use pywatt_wire::PortOutcome;

use crate::breaker::CircuitBreaker;
use crate::error::PortError;
use crate::sink::PortRequestSink;

const OVERALL_DEADLINE: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF: [Duration; 2] = [Duration::from_millis(250), Duration::from_secs(1)];
const FALLBACK_RANGE: std::ops::RangeInclusive<u16> = 49152..=65535;
const FALLBACK_BIND_ATTEMPTS: u32 = 20;

/// A port the module may bind to, and whether the orchestrator knows
/// about it (spec.md §4.6 fallback: `unadvertised=true` when the port was
/// chosen locally rather than granted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedPort {
    pub port: u16,
    pub unadvertised: bool,
}

/// Reads a pre-allocated port out of `InitBlob.env`, bypassing negotiation
/// entirely (spec.md §4.6).
pub fn port_from_env(env: &HashMap<String, String>) -> Option<u16> {
    env.get("PYWATT_PORT").and_then(|v| v.parse().ok())
}

pub struct PortNegotiator {
    sink: Arc<dyn PortRequestSink>,
    correlator: Arc<RequestCorrelator<PortOutcome>>,
    breaker: CircuitBreaker,
}

impl PortNegotiator {
    pub fn new(sink: Arc<dyn PortRequestSink>, correlator: Arc<RequestCorrelator<PortOutcome>>) -> Self {
        PortNegotiator {
            sink,
            correlator,
            breaker: CircuitBreaker::new(),
        }
    }

    /// Called by the dispatcher when a `PortResponse` arrives.
    pub fn complete(&self, request_id: Uuid, outcome: PortOutcome) {
        self.correlator.complete(request_id, Ok(outcome));
    }

    /// Negotiate a port: up to 3 attempts with exponential backoff inside
    /// a 10s overall deadline, falling back to a random bindable port in
    /// the dynamic range when the breaker is open or all attempts fail.
    pub async fn negotiate(&self, specific_port: Option<u16>) -> Result<NegotiatedPort, PortError> {
        if !self.breaker.allow_request() {
            debug!("circuit breaker open, skipping straight to fallback");
            return self.fallback().await;
        }

        let deadline = Instant::now() + OVERALL_DEADLINE;
        let mut attempt: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.breaker.record_failure();
                return self.fallback().await;
            }

            let request_id = Uuid::new_v4();
            let rx = match self.correlator.insert(request_id) {
                Ok(rx) => rx,
                Err(correlator_error) => {
                    warn!(attempt, error = %correlator_error, "failed to register port request slot");
                    self.breaker.record_failure();
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return self.fallback().await;
                    }
                    tokio::time::sleep(BACKOFF[(attempt - 1) as usize].min(remaining)).await;
                    continue;
                }
            };

            if let Err(e) = self.sink.send_port_request(request_id, specific_port).await {
                warn!(attempt, error = %e, "failed to send port request");
                self.breaker.record_failure();
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return self.fallback().await;
                }
                tokio::time::sleep(BACKOFF[(attempt - 1) as usize].min(remaining)).await;
                continue;
            }

            match self.correlator.wait(request_id, rx, remaining).await {
                Ok(PortOutcome::Port { port, unadvertised }) => {
                    self.breaker.record_success();
                    return Ok(NegotiatedPort { port, unadvertised });
                }
                Ok(PortOutcome::Error { error }) => {
                    warn!(attempt, error, "orchestrator denied port request");
                    self.breaker.record_failure();
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return self.fallback().await;
                    }
                    tokio::time::sleep(BACKOFF[(attempt - 1) as usize].min(remaining)).await;
                }
                Err(correlator_error) => {
                    warn!(attempt, error = %correlator_error, "port request unanswered");
                    self.breaker.record_failure();
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return self.fallback().await;
                    }
                    tokio::time::sleep(BACKOFF[(attempt - 1) as usize].min(remaining)).await;
                }
            }
        }
    }

    async fn fallback(&self) -> Result<NegotiatedPort, PortError> {
        for _ in 0..FALLBACK_BIND_ATTEMPTS {
            let candidate = rand::thread_rng().gen_range(FALLBACK_RANGE);
            if let Ok(listener) = TcpListener::bind(("127.0.0.1", candidate)).await {
                drop(listener);
                debug!(port = candidate, "falling back to locally chosen port");
                return Ok(NegotiatedPort { port: candidate, unadvertised: true });
            }
        }
        Err(PortError::NoBindablePortFound)
    }
}
