//! Shared protocol types: the init/announce handshake blobs, the stdio
//! control-message unions, and the HTTP tunnel payloads (spec.md §3).
//!
//! These are the shapes every higher-level crate (secrets, port
//! negotiation, stdio transport, inter-module messaging) builds or reads;
//! keeping them here — next to the codec that encodes them — avoids a
//! circular dependency between those crates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque module identity, assigned by the orchestrator.
pub type ModuleId = String;

/// Non-empty, case-sensitive secret name.
pub type SecretName = String;

/// How strongly the orchestrator authenticates this module's channels.
///
/// Serialized under its bare Rust variant names (`"None"`, `"Token"`,
/// `"Mtls"`) — spec.md §8 scenario 1 feeds `"security_level":"None"`
/// verbatim, so this must not be `snake_case`-renamed like the purely
/// internal descriptor enums in `descriptors.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityLevel {
    None,
    Token,
    Mtls,
}

/// The `listen` field of `InitBlob`: where the module should ultimately
/// be reachable, before any port negotiation happens.
///
/// Untagged so `{"tcp":"127.0.0.1:0"}` deserializes straight into
/// `Tcp { tcp }` (spec.md §8 scenario 1) rather than needing a wrapper
/// discriminator key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListenAddress {
    Tcp { tcp: String },
    Unix { unix: String },
}

/// Optional dedicated TCP channel configuration carried in `InitBlob`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpChannelConfig {
    pub address: String,
    #[serde(default)]
    pub tls_enabled: bool,
    #[serde(default)]
    pub required: bool,
}

/// Optional dedicated Unix-socket channel configuration carried in `InitBlob`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcChannelConfig {
    pub socket_path: String,
    #[serde(default)]
    pub required: bool,
}

/// The single line the orchestrator writes to the module's stdin at
/// startup (spec.md §3, §4.8 step 2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitBlob {
    pub orchestrator_api: String,
    pub module_id: ModuleId,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub listen: ListenAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_channel: Option<TcpChannelConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipc_channel: Option<IpcChannelConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default = "default_security_level")]
    pub security_level: SecurityLevel,
}

fn default_security_level() -> SecurityLevel {
    SecurityLevel::None
}

/// One HTTP endpoint this module serves, for the announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub path: String,
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

/// The single line the module writes to stdout once channels are ready
/// (spec.md §3, §4.8 step 8). Exactly one of these is emitted per process
/// lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceBlob {
    pub listen: String,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Status a module reports after processing a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStatus {
    Ok,
    Failed,
}

/// An HTTP request tunneled to the module over an IPC channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcHttpRequest {
    pub request_id: Uuid,
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
}

/// The module's response to a tunneled HTTP request. `request_id` must
/// echo the originating request (spec.md §3 invariant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcHttpResponse {
    pub request_id: Uuid,
    pub status_code: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
}

/// A port the orchestrator handed back, or the reason it could not.
/// Untagged so that, flattened into `PortResponse`, the wire shape is
/// `{"request_id": ..., "port": ..., "unadvertised": ...}` or
/// `{"request_id": ..., "error": ...}` per spec.md §3's `port|error` union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortOutcome {
    Port { port: u16, unadvertised: bool },
    Error { error: String },
}

/// Module -> orchestrator control messages, carried one per stdio line
/// (spec.md §3).
///
/// Externally tagged under the bare Rust variant name, no `kind` field
/// and no case conversion — spec.md §8's scenarios write these on the
/// wire as `{"RotationAck": {...}}`, `{"HttpResponse": {...}}`, etc.,
/// not `{"kind": "rotation_ack", ...}`. The one-time `AnnounceBlob` on
/// stdout is a different story: spec.md §3 documents it as its own
/// top-level shape, separate from this union, and §8 scenario 1 expects
/// the stdout line to parse directly as `AnnounceBlob` with no wrapper
/// at all — `StdioWriter::write_announcement` writes it outside this
/// enum entirely, so there is no `Announce` variant here to round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleToOrchestrator {
    GetSecret {
        name: SecretName,
    },
    RotationAck {
        rotation_id: String,
        status: RotationStatus,
    },
    PortRequest {
        request_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        specific_port: Option<u16>,
    },
    InternalRequest {
        request_id: Uuid,
        target_module_id: ModuleId,
        endpoint: String,
        payload: serde_json::Value,
    },
    HeartbeatAck,
    /// The module's reply to an inbound `HttpRequest` (spec.md §4.9: "the
    /// adapter writes responses back through the same channel on which
    /// the request arrived"). Not itemized in spec.md §3's message list
    /// alongside the others, but required for that sentence to be
    /// realizable at all — carried the same way `HttpRequest` rides the
    /// orchestrator->module direction, as a single-field tuple variant.
    HttpResponse(IpcHttpResponse),
    /// The module's reply to an inbound `RoutedModuleMessage` (spec.md
    /// §4.10: "the adapter wraps that result in `RoutedModuleResponse` ...
    /// and sends it on the same channel"). `RoutedModuleResponse` is only
    /// itemized under the orchestrator->module direction in spec.md §3,
    /// but the relay it describes is necessarily bidirectional — the
    /// receiving module answers the orchestrator with exactly this shape
    /// before the orchestrator relays it on to the original sender.
    RoutedModuleResponse {
        request_id: Uuid,
        #[serde(flatten)]
        result: RoutedResult,
    },
}

/// Orchestrator -> module control messages, carried one per stdio line
/// (spec.md §3). Externally tagged under the bare Rust variant name —
/// see `ModuleToOrchestrator`'s doc comment for why. Unknown variants
/// must be logged-and-skipped by the reader, never treated as fatal
/// (spec.md §6) — enforced by `pywatt-transport-stdio`, not by this
/// type itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorToModule {
    Secret {
        name: SecretName,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rotation_id: Option<String>,
    },
    Rotated {
        keys: Vec<SecretName>,
        rotation_id: String,
    },
    Shutdown,
    PortResponse {
        request_id: Uuid,
        #[serde(flatten)]
        outcome: PortOutcome,
    },
    RoutedModuleMessage {
        source_module_id: ModuleId,
        request_id: Uuid,
        payload: serde_json::Value,
    },
    RoutedModuleResponse {
        request_id: Uuid,
        #[serde(flatten)]
        result: RoutedResult,
    },
    HttpRequest(IpcHttpRequest),
    Heartbeat,
}

/// The outcome half of `RoutedModuleResponse`, flattened so the wire
/// shape carries `result` or `error` directly alongside `request_id`
/// (spec.md §3's `result|error` union).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoutedResult {
    Result { result: serde_json::Value },
    Error { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_blob_round_trips_through_json() {
        let line = r#"{"orchestrator_api":"x","module_id":"m1","env":{},"listen":{"tcp":"127.0.0.1:0"},"security_level":"None"}"#;
        let blob: InitBlob = serde_json::from_str(line).unwrap();
        assert_eq!(blob.module_id, "m1");
        assert_eq!(blob.security_level, SecurityLevel::None);
        assert_eq!(blob.listen, ListenAddress::Tcp { tcp: "127.0.0.1:0".to_owned() });
    }

    #[test]
    fn module_to_orchestrator_get_secret_serializes_under_its_bare_variant_name() {
        let msg = ModuleToOrchestrator::GetSecret {
            name: "DATABASE_URL".to_owned(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["GetSecret"]["name"], "DATABASE_URL");
    }

    #[test]
    fn orchestrator_to_module_secret_round_trips() {
        let line = r#"{"Secret":{"name":"DATABASE_URL","value":"postgres://u:p@h/db"}}"#;
        let msg: OrchestratorToModule = serde_json::from_str(line).unwrap();
        match msg {
            OrchestratorToModule::Secret { name, value, rotation_id } => {
                assert_eq!(name, "DATABASE_URL");
                assert_eq!(value, "postgres://u:p@h/db");
                assert_eq!(rotation_id, None);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_top_level_variant_fails_to_parse_as_a_type_error_not_a_panic() {
        let line = r#"{"SomeFutureMessage":{}}"#;
        let result: Result<OrchestratorToModule, _> = serde_json::from_str(line);
        assert!(result.is_err());
    }

    #[test]
    fn rotation_ack_serializes_expected_shape() {
        let msg = ModuleToOrchestrator::RotationAck {
            rotation_id: "r1".to_owned(),
            status: RotationStatus::Ok,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"RotationAck":{"rotation_id":"r1","status":"ok"}}"#);
    }

    #[test]
    fn routed_module_response_flattens_result_alongside_request_id() {
        let request_id = Uuid::new_v4();
        let msg = OrchestratorToModule::RoutedModuleResponse {
            request_id,
            result: RoutedResult::Result { result: serde_json::json!({"pong": true}) },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["RoutedModuleResponse"]["request_id"], request_id.to_string());
        assert_eq!(json["RoutedModuleResponse"]["result"]["pong"], true);
    }

    #[test]
    fn http_request_round_trips_without_a_kind_wrapper() {
        let line = r#"{"HttpRequest":{"request_id":"3fa85f64-5717-4562-b3fc-2c963f66afa6","method":"GET","uri":"/health","headers":{}}}"#;
        let msg: OrchestratorToModule = serde_json::from_str(line).unwrap();
        match msg {
            OrchestratorToModule::HttpRequest(request) => {
                assert_eq!(request.method, "GET");
                assert_eq!(request.uri, "/health");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
