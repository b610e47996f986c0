//! Environment-variable configuration surface (spec.md §6). There is no
//! on-disk config: everything the runtime needs beyond `InitBlob` comes
//! from these variables, read once at bootstrap, the way the teacher's
//! `forwarder::config::load_config` centralizes config loading into one
//! place instead of scattering `env::var` calls through the codebase.

use std::collections::HashMap;

/// `PYWATT_MODULE_ID` — sets `ModuleId` without a handshake (test mode).
pub const MODULE_ID_VAR: &str = "PYWATT_MODULE_ID";
/// `PYWATT_PORT` — pre-allocated port, bypasses negotiation (see
/// `pywatt_port::port_from_env`, which reads it out of `InitBlob.env`
/// rather than the process environment; this constant documents the same
/// name for the process-environment case).
pub const PORT_VAR: &str = "PYWATT_PORT";
/// `PYWATT_IPC_ONLY` — truthy value disables HTTP binding.
pub const IPC_ONLY_VAR: &str = "PYWATT_IPC_ONLY";

/// Runtime-wide configuration resolved from the process environment at
/// bootstrap.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub module_id_override: Option<String>,
    pub ipc_only: bool,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_map(&std::env::vars().collect())
    }

    /// Testable variant of `from_env` that reads a caller-supplied map
    /// instead of the real process environment.
    pub fn from_map(env: &HashMap<String, String>) -> Self {
        RuntimeConfig {
            module_id_override: env.get(MODULE_ID_VAR).cloned(),
            ipc_only: env.get(IPC_ONLY_VAR).is_some_and(|v| is_truthy(v)),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_only_recognizes_common_truthy_spellings() {
        for value in ["1", "true", "TRUE", "yes", "on"] {
            let mut env = HashMap::new();
            env.insert(IPC_ONLY_VAR.to_owned(), value.to_owned());
            assert!(RuntimeConfig::from_map(&env).ipc_only, "{value:?} should be truthy");
        }
    }

    #[test]
    fn ipc_only_defaults_to_false_when_absent() {
        let env = HashMap::new();
        assert!(!RuntimeConfig::from_map(&env).ipc_only);
    }

    #[test]
    fn module_id_override_is_read_when_present() {
        let mut env = HashMap::new();
        env.insert(MODULE_ID_VAR.to_owned(), "m-test".to_owned());
        assert_eq!(RuntimeConfig::from_map(&env).module_id_override, Some("m-test".to_owned()));
    }
}
