//! `ChannelHealth` snapshot (supplement to C11, spec.md §4.11): the
//! comparison §4.11 step 2 requires ("lowest observed mean latency") but
//! never names a carrier type for.

use std::time::Duration;

use pywatt_wire::ChannelState;

/// Point-in-time health of one channel, backing `AppState::channel_health`
/// and `available_channels`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelHealth {
    pub state: ChannelState,
    pub mean_latency: Duration,
    pub consecutive_failures: u32,
}

impl ChannelHealth {
    pub fn new(state: ChannelState) -> Self {
        ChannelHealth { state, mean_latency: Duration::ZERO, consecutive_failures: 0 }
    }

    pub fn is_usable(&self) -> bool {
        self.state == ChannelState::Connected
    }

    /// Fold a freshly observed round-trip latency into the running mean.
    /// A simple exponential moving average, cheap to update on every
    /// response without keeping a full sample history.
    pub fn record_latency(&mut self, observed: Duration) {
        const ALPHA: f64 = 0.2;
        let prev = self.mean_latency.as_secs_f64();
        let next = if prev == 0.0 {
            observed.as_secs_f64()
        } else {
            prev + ALPHA * (observed.as_secs_f64() - prev)
        };
        self.mean_latency = Duration::from_secs_f64(next.max(0.0));
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_latency_sample_sets_the_mean_directly() {
        let mut health = ChannelHealth::new(ChannelState::Connected);
        health.record_latency(Duration::from_millis(40));
        assert_eq!(health.mean_latency, Duration::from_millis(40));
    }

    #[test]
    fn failure_increments_and_success_resets_the_streak() {
        let mut health = ChannelHealth::new(ChannelState::Connected);
        health.record_failure();
        health.record_failure();
        assert_eq!(health.consecutive_failures, 2);
        health.record_latency(Duration::from_millis(10));
        assert_eq!(health.consecutive_failures, 0);
    }

    #[test]
    fn only_connected_state_is_usable() {
        assert!(ChannelHealth::new(ChannelState::Connected).is_usable());
        assert!(!ChannelHealth::new(ChannelState::Disconnected).is_usable());
    }
}
