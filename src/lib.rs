//! Module-side runtime SDK for the PyWatt orchestrator ecosystem.
//!
//! A module process links this crate, calls [`bootstrap`] once at
//! startup, and gets back an [`AppState`] it holds for the rest of its
//! life: secrets, channel health, inter-module messaging, and the
//! HTTP-over-IPC tunnel all hang off that one handle.

mod bootstrap;
mod channel_health;
mod config;
mod error;
mod http_adapter;
mod logging;
mod state;
pub mod testing;

pub use bootstrap::{BootstrapOptions, Bootstrapped, HttpServing, InitialSecret, bootstrap};
pub use channel_health::ChannelHealth;
pub use config::{IPC_ONLY_VAR, MODULE_ID_VAR, PORT_VAR, RuntimeConfig};
pub use error::{Error, exit_code};
pub use http_adapter::{HttpAdapter, HttpAdapterError, HttpMetricsSnapshot, HttpResponseSink, select_inbound_channel};
pub use logging::init_logging;
pub use state::{AppState, ChannelTarget, MessagingError, PeerMessageHandler};

pub use pywatt_correlator::CorrelatorError;
pub use pywatt_port::{NegotiatedPort, PortError, PortNegotiator};
pub use pywatt_secrets::{GetMode, RotationEvent, Secret, SecretClient, SecretError};
pub use pywatt_wire::{
    AnnounceBlob, ChannelPreferences, ChannelState, ChannelType, EndpointDescriptor, InitBlob, IpcHttpRequest,
    IpcHttpResponse, ListenAddress, SecurityLevel,
};
