use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use devlink_frame::{Frame, FrameWriter, RPC};
use devlink_link::LinkStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::error::RpcError;
use crate::message::{
    qualified_service, RpcPacket, AUTOMATION_NAMESPACE, DIAGNOSTIC_NAMESPACE, ECHO_METHOD,
    ECHO_SERVICE,
};
use crate::worker::{FrameHandler, HandlerError};

type CallResult<T> = std::result::Result<T, RpcError>;

/// What a call that outlives its timeout returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Fail with [`RpcError::Timeout`].
    #[default]
    Error,
    /// Report a declined call, `(false, b"")`.
    Nack,
}

/// RPC channel configuration.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// How long `call` waits for the correlated response. Default: 1 s.
    pub call_timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
    /// Namespace prefixed to service names passed to `call`.
    pub namespace: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(1),
            timeout_policy: TimeoutPolicy::default(),
            namespace: AUTOMATION_NAMESPACE.to_string(),
        }
    }
}

/// Outcome of a completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcReply {
    /// Whether the device accepted the call.
    pub ack: bool,
    /// Encoded response message; empty when declined.
    pub payload: Bytes,
}

impl RpcReply {
    pub fn nack() -> Self {
        Self {
            ack: false,
            payload: Bytes::new(),
        }
    }

    pub fn into_parts(self) -> (bool, Bytes) {
        (self.ack, self.payload)
    }

    /// Decode the payload as a JSON message.
    pub fn decode<T: DeserializeOwned>(&self) -> CallResult<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EchoMessage {
    msg: String,
}

/// Calls awaiting a response, keyed by call id.
///
/// Dropping a call's sender wakes its caller with `Disconnected`.
#[derive(Default)]
struct CallTable {
    pending: Mutex<HashMap<u32, Sender<RpcReply>>>,
    next_id: AtomicU32,
    closed: AtomicBool,
}

impl CallTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Sender<RpcReply>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self) -> CallResult<(u32, channel::Receiver<RpcReply>)> {
        let mut pending = self.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Disconnected);
        }
        let mut call_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        while pending.contains_key(&call_id) {
            call_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        }
        let (tx, rx) = channel::bounded(1);
        pending.insert(call_id, tx);
        Ok((call_id, rx))
    }

    fn resolve(&self, call_id: u32, reply: RpcReply) -> bool {
        match self.lock().remove(&call_id) {
            Some(tx) => tx.try_send(reply).is_ok(),
            None => false,
        }
    }

    fn forget(&self, call_id: u32) {
        self.lock().remove(&call_id);
    }

    fn close(&self) -> usize {
        let mut pending = self.lock();
        self.closed.store(true, Ordering::Release);
        let failed = pending.len();
        pending.clear();
        failed
    }
}

/// Synchronous request/response channel on the `RPC` address.
///
/// Requests are written from the calling thread; responses arrive on the
/// link worker through [`RpcHandler`] and are matched by call id, so several
/// threads may have calls in flight at once.
pub struct RpcChannel {
    writer: Mutex<FrameWriter<LinkStream>>,
    calls: Arc<CallTable>,
    config: RpcConfig,
}

impl RpcChannel {
    pub fn new(link: LinkStream, config: RpcConfig) -> Self {
        Self {
            writer: Mutex::new(FrameWriter::new(link)),
            calls: Arc::new(CallTable::default()),
            config,
        }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Frame handler resolving this channel's calls.
    pub fn handler(&self) -> RpcHandler {
        RpcHandler {
            calls: Arc::clone(&self.calls),
        }
    }

    /// Call `method` on `service` in the configured namespace.
    ///
    /// `kwargs` must serialize to a JSON object (or unit/`null` for no
    /// arguments).
    pub fn call(&self, service: &str, method: &str, kwargs: impl Serialize) -> CallResult<RpcReply> {
        let service = qualified_service(&self.config.namespace, service);
        self.call_qualified(&service, method, kwargs)
    }

    /// Call `method` on a fully qualified service name.
    pub fn call_qualified(
        &self,
        service: &str,
        method: &str,
        kwargs: impl Serialize,
    ) -> CallResult<RpcReply> {
        let kwargs = match serde_json::to_value(kwargs)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(RpcError::InvalidArguments(json_kind(&other))),
        };

        let (call_id, reply) = self.calls.register()?;
        let request = RpcPacket::Request {
            call_id,
            service: service.to_string(),
            method: method.to_string(),
            kwargs,
        };

        if let Err(err) = self.send(&request) {
            self.calls.forget(call_id);
            return Err(err);
        }
        debug!(call_id, service, method, "rpc request sent");

        match reply.recv_timeout(self.config.call_timeout) {
            Ok(reply) => {
                debug!(call_id, ack = reply.ack, size = reply.payload.len(), "rpc reply");
                Ok(reply)
            }
            Err(RecvTimeoutError::Disconnected) => Err(RpcError::Disconnected),
            Err(RecvTimeoutError::Timeout) => {
                self.calls.forget(call_id);
                warn!(
                    call_id,
                    service,
                    method,
                    timeout = ?self.config.call_timeout,
                    "rpc call timed out"
                );
                match self.config.timeout_policy {
                    TimeoutPolicy::Nack => Ok(RpcReply::nack()),
                    TimeoutPolicy::Error => Err(RpcError::Timeout {
                        service: service.to_string(),
                        method: method.to_string(),
                        timeout: self.config.call_timeout,
                    }),
                }
            }
        }
    }

    /// Round-trip `msg` through the diagnostic echo service.
    pub fn echo(&self, msg: &str) -> CallResult<(bool, String)> {
        let service = qualified_service(DIAGNOSTIC_NAMESPACE, ECHO_SERVICE);
        let reply = self.call_qualified(&service, ECHO_METHOD, EchoMessage { msg: msg.into() })?;
        if !reply.ack {
            return Ok((false, String::new()));
        }
        let echoed: EchoMessage = reply.decode()?;
        Ok((true, echoed.msg))
    }

    /// Wake every pending call with [`RpcError::Disconnected`] and refuse
    /// new ones.
    pub fn fail_pending(&self) {
        let failed = self.calls.close();
        if failed > 0 {
            debug!(failed, "failed pending rpc calls");
        }
    }

    pub fn pending_calls(&self) -> usize {
        self.calls.lock().len()
    }

    fn send(&self, packet: &RpcPacket) -> CallResult<()> {
        let encoded = packet.encode()?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.send(RPC, &encoded)?;
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Routes responses on the `RPC` address to waiting callers.
pub struct RpcHandler {
    calls: Arc<CallTable>,
}

impl FrameHandler for RpcHandler {
    fn handle(&mut self, frame: &Frame) -> Result<(), HandlerError> {
        match RpcPacket::decode(&frame.payload)? {
            RpcPacket::Response {
                call_id,
                ack,
                payload,
            } => {
                let reply = RpcReply {
                    ack,
                    payload: Bytes::from(payload),
                };
                if self.calls.resolve(call_id, reply) {
                    trace!(call_id, "rpc call resolved");
                } else {
                    warn!(call_id, "response for unknown or expired call");
                }
            }
            RpcPacket::Request {
                call_id,
                service,
                method,
                ..
            } => {
                warn!(call_id, %service, %method, "ignoring request from device");
            }
        }
        Ok(())
    }

    fn on_close(&mut self) {
        let failed = self.calls.close();
        if failed > 0 {
            warn!(failed, "link closed with rpc calls pending");
        }
    }
}
