//! Test-mode `AppState` construction: build one without performing the
//! stdin handshake, for tests of module code that depends on `AppState`
//! but isn't driving a real orchestrator process.

use std::sync::Arc;

use pywatt_correlator::RequestCorrelator;
use pywatt_secrets::SecretClient;
use pywatt_transport_stdio::{StdioSecretSink, StdioWriter};
use pywatt_wire::ChannelPreferences;

use crate::config::RuntimeConfig;
use crate::state::AppState;

/// Build an `AppState` with no live socket channels and no handshake —
/// `module_id` is `PYWATT_MODULE_ID` from the environment when set
/// (mirroring `RuntimeConfig::from_env`, the same variable a real
/// orchestrator-less run would honor), else `fallback_module_id`.
pub fn test_app_state<S: Send + Sync + 'static>(fallback_module_id: &str, user_state: S) -> Arc<AppState<S>> {
    let config = RuntimeConfig::from_env();
    let module_id = config.module_id_override.unwrap_or_else(|| fallback_module_id.to_owned());

    let stdio_writer = Arc::new(StdioWriter::new(tokio::io::stdout()));
    let secret_sink = Arc::new(StdioSecretSink::new(stdio_writer.clone()));
    let secrets = Arc::new(SecretClient::new(secret_sink));

    Arc::new(AppState::new(
        module_id,
        "test://orchestrator".to_owned(),
        user_state,
        secrets,
        stdio_writer,
        None,
        None,
        None,
        Arc::new(RequestCorrelator::new()),
        ChannelPreferences::default(),
    ))
}
