//! Channel descriptor types (spec.md §3 "Channel descriptor", C11):
//! shared vocabulary for describing a channel's kind, lifecycle state,
//! capabilities, and selection preferences. Transports (C2, C3) drive a
//! channel through `ChannelState`; `AppState` (C11) reads it back.

use serde::{Deserialize, Serialize};

/// Which concrete transport backs a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Stdio,
    Tcp,
    Ipc,
}

/// Lifecycle state of a channel (spec.md §3, §4.3).
///
/// Transitions: `Disconnected -> Connecting -> Connected -> (Disconnected
/// | Failed) -> Connecting ...`. Once `PermanentlyClosed`, a channel never
/// transitions back to `Connected` (spec.md §3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
    PermanentlyClosed,
}

impl ChannelState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::{Connected, Connecting, Disconnected, Failed, PermanentlyClosed};
        match self {
            PermanentlyClosed => false,
            Disconnected => matches!(next, Connecting | PermanentlyClosed),
            Connecting => matches!(next, Connected | Failed | Disconnected | PermanentlyClosed),
            Connected => matches!(next, Disconnected | Failed | PermanentlyClosed),
            Failed => matches!(next, Connecting | PermanentlyClosed),
        }
    }
}

/// What a channel can carry, advertised at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCapabilities {
    pub module_messaging: bool,
    pub http_proxy: bool,
    pub streaming: bool,
    pub max_message_size: u64,
}

/// How the runtime should pick among live channels for a given send
/// (spec.md §4.9 channel-selection policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPreferences {
    pub use_tcp: bool,
    pub use_ipc: bool,
    pub prefer_ipc_for_local: bool,
    pub prefer_tcp_for_remote: bool,
    pub enable_fallback: bool,
}

impl Default for ChannelPreferences {
    fn default() -> Self {
        ChannelPreferences {
            use_tcp: true,
            use_ipc: true,
            prefer_ipc_for_local: true,
            prefer_tcp_for_remote: true,
            enable_fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanently_closed_never_transitions_back() {
        assert!(!ChannelState::PermanentlyClosed.can_transition_to(ChannelState::Connected));
        assert!(!ChannelState::PermanentlyClosed.can_transition_to(ChannelState::Connecting));
    }

    #[test]
    fn connecting_may_reach_connected_or_failed() {
        assert!(ChannelState::Connecting.can_transition_to(ChannelState::Connected));
        assert!(ChannelState::Connecting.can_transition_to(ChannelState::Failed));
    }

    #[test]
    fn default_preferences_enable_both_channels_and_fallback() {
        let prefs = ChannelPreferences::default();
        assert!(prefs.use_tcp);
        assert!(prefs.use_ipc);
        assert!(prefs.enable_fallback);
    }
}
