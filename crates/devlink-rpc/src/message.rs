use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Namespace of the device automation services.
pub const AUTOMATION_NAMESPACE: &str = "chip.rpc";
/// Namespace of the transport-level diagnostic services.
pub const DIAGNOSTIC_NAMESPACE: &str = "pw.rpc";
/// Echo diagnostic service, under [`DIAGNOSTIC_NAMESPACE`].
pub const ECHO_SERVICE: &str = "EchoService";
/// The echo service's only method.
pub const ECHO_METHOD: &str = "Echo";

/// Payload of a frame on the `RPC` address.
///
/// `service` is fully qualified (`chip.rpc.Lighting`), which is what lets
/// several services share one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcPacket {
    Request {
        call_id: u32,
        service: String,
        method: String,
        #[serde(default)]
        kwargs: Map<String, Value>,
    },
    Response {
        call_id: u32,
        ack: bool,
        #[serde(default)]
        payload: Vec<u8>,
    },
}

impl RpcPacket {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn call_id(&self) -> u32 {
        match self {
            Self::Request { call_id, .. } | Self::Response { call_id, .. } => *call_id,
        }
    }
}

/// Join a namespace and a service name.
pub fn qualified_service(namespace: &str, service: &str) -> String {
    if namespace.is_empty() {
        service.to_string()
    } else {
        format!("{namespace}.{service}")
    }
}
