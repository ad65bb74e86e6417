//! In-process device simulator.
//!
//! Serves the RPC protocol on the device end of a link so transports, CLI
//! commands and executor tasks can be exercised without hardware.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use devlink_frame::{FrameError, FrameReader, FrameWriter, LOG, RPC};
use devlink_link::{LinkListener, LinkStream};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::RpcError;
use crate::message::{
    qualified_service, RpcPacket, AUTOMATION_NAMESPACE, DIAGNOSTIC_NAMESPACE, ECHO_METHOD,
    ECHO_SERVICE,
};

/// How a simulated service answers a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceReply {
    /// Accept with an encoded response message.
    Ack(Vec<u8>),
    /// Decline.
    Nack,
    /// Send nothing; the caller times out.
    Ignore,
}

impl ServiceReply {
    /// Accept with `value` encoded as JSON.
    pub fn json(value: &Value) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => Self::Ack(bytes),
            Err(_) => Self::Nack,
        }
    }
}

type ServiceFn = Arc<dyn Fn(&str, &Map<String, Value>) -> ServiceReply + Send + Sync>;

/// Counters for one served connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub requests: u64,
    pub invalid_frames: u64,
}

/// A scripted device answering RPC requests.
#[derive(Clone)]
pub struct Simulator {
    services: HashMap<String, ServiceFn>,
    boot_log: Vec<String>,
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut services: Vec<&String> = self.services.keys().collect();
        services.sort();
        f.debug_struct("Simulator")
            .field("services", &services)
            .field("boot_log", &self.boot_log.len())
            .finish()
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    /// A simulator serving only the echo diagnostic.
    pub fn new() -> Self {
        let sim = Self {
            services: HashMap::new(),
            boot_log: Vec::new(),
        };
        sim.service(
            qualified_service(DIAGNOSTIC_NAMESPACE, ECHO_SERVICE),
            |method, kwargs| {
                if method == ECHO_METHOD {
                    ServiceReply::json(&Value::Object(kwargs.clone()))
                } else {
                    ServiceReply::Nack
                }
            },
        )
    }

    /// Serve `service` (fully qualified) with `handler(method, kwargs)`.
    pub fn service(
        mut self,
        service: impl Into<String>,
        handler: impl Fn(&str, &Map<String, Value>) -> ServiceReply + Send + Sync + 'static,
    ) -> Self {
        self.services.insert(service.into(), Arc::new(handler));
        self
    }

    /// Serve `name` in the automation namespace.
    pub fn automation_service(
        self,
        name: &str,
        handler: impl Fn(&str, &Map<String, Value>) -> ServiceReply + Send + Sync + 'static,
    ) -> Self {
        self.service(qualified_service(AUTOMATION_NAMESPACE, name), handler)
    }

    /// Lines written on the `LOG` address when a connection starts.
    pub fn boot_log<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.boot_log.extend(lines.into_iter().map(Into::into));
        self
    }

    /// A light bulb: `Lighting.Set` stores and echoes its kwargs (levels
    /// above 255 are declined), `Lighting.Get` returns the stored state.
    pub fn demo() -> Self {
        let state = Arc::new(Mutex::new(Map::new()));
        Self::new()
            .boot_log(["boot: devlink simulator", "boot: lighting ready"])
            .automation_service("Lighting", move |method, kwargs| {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                match method {
                    "Set" => {
                        let level = kwargs.get("level").and_then(Value::as_u64).unwrap_or(0);
                        if level > 255 {
                            return ServiceReply::Nack;
                        }
                        state.extend(kwargs.clone());
                        ServiceReply::json(&Value::Object(kwargs.clone()))
                    }
                    "Get" => ServiceReply::json(&Value::Object(state.clone())),
                    _ => ServiceReply::Nack,
                }
            })
    }

    /// Answer requests on `link` until the peer disconnects.
    pub fn serve(&self, link: LinkStream) -> Result<SimStats, RpcError> {
        let mut reader = FrameReader::new(link.try_clone()?);
        let mut writer = FrameWriter::new(link);
        let mut stats = SimStats::default();

        for line in &self.boot_log {
            writer.send(LOG, line.as_bytes())?;
        }

        loop {
            let frame = match reader.read_frame() {
                Ok(frame) => frame,
                Err(FrameError::ConnectionClosed) => break,
                Err(err) => return Err(err.into()),
            };
            if !frame.valid {
                stats.invalid_frames += 1;
                continue;
            }
            if frame.address != RPC {
                debug!(address = frame.address, "simulator ignoring frame");
                continue;
            }

            let (call_id, service, method, kwargs) = match RpcPacket::decode(&frame.payload) {
                Ok(RpcPacket::Request {
                    call_id,
                    service,
                    method,
                    kwargs,
                }) => (call_id, service, method, kwargs),
                Ok(RpcPacket::Response { call_id, .. }) => {
                    warn!(call_id, "simulator received a response");
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "simulator received malformed request");
                    continue;
                }
            };
            stats.requests += 1;

            let reply = match self.services.get(&service) {
                Some(handler) => handler(&method, &kwargs),
                None => {
                    warn!(%service, %method, "no such simulated service");
                    ServiceReply::Nack
                }
            };
            debug!(call_id, %service, %method, ?reply, "simulated call");

            let (ack, payload) = match reply {
                ServiceReply::Ack(payload) => (true, payload),
                ServiceReply::Nack => (false, Vec::new()),
                ServiceReply::Ignore => continue,
            };
            let response = RpcPacket::Response {
                call_id,
                ack,
                payload,
            };
            writer.send(RPC, &response.encode()?)?;
        }

        Ok(stats)
    }

    /// Accept connections on `listener`, serving each on its own thread.
    ///
    /// Returns after `max_connections` connections have been served, or
    /// never if it is `None`.
    pub fn run(&self, listener: &LinkListener, max_connections: Option<usize>) -> Result<(), RpcError> {
        info!(path = %listener.path().display(), "simulator listening");
        let mut served = Vec::new();

        while max_connections.is_none_or(|max| served.len() < max) {
            let link = listener.accept()?;
            let sim = self.clone();
            let connection = served.len();
            served.push(thread::spawn(move || match sim.serve(link) {
                Ok(stats) => info!(
                    connection,
                    requests = stats.requests,
                    invalid_frames = stats.invalid_frames,
                    "simulator connection closed"
                ),
                Err(err) => warn!(connection, error = %err, "simulator connection failed"),
            }));
        }

        for handle in served {
            let _ = handle.join();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use devlink_frame::Frame;
    use serde_json::json;

    use super::*;

    fn request(call_id: u32, service: &str, method: &str, kwargs: Value) -> Vec<u8> {
        let Value::Object(kwargs) = kwargs else {
            panic!("kwargs must be an object");
        };
        RpcPacket::Request {
            call_id,
            service: service.into(),
            method: method.into(),
            kwargs,
        }
        .encode()
        .unwrap()
    }

    fn response(frame: Frame) -> (u32, bool, Value) {
        match RpcPacket::decode(&frame.payload).unwrap() {
            RpcPacket::Response {
                call_id,
                ack,
                payload,
            } => {
                let value = if payload.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_slice(&payload).unwrap()
                };
                (call_id, ack, value)
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn demo_serves_boot_log_and_lighting() {
        let (device, host) = LinkStream::pair().unwrap();
        let server = thread::spawn(move || Simulator::demo().serve(device).unwrap());

        let mut reader = FrameReader::new(host.try_clone().unwrap());
        let mut writer = FrameWriter::new(host);

        let boot = reader.read_valid_frame().unwrap();
        assert_eq!(boot.address, LOG);
        assert_eq!(boot.payload, "boot: devlink simulator");
        reader.read_valid_frame().unwrap();

        writer
            .send(RPC, &request(1, "chip.rpc.Lighting", "Set", json!({ "level": 10 })))
            .unwrap();
        assert_eq!(
            response(reader.read_valid_frame().unwrap()),
            (1, true, json!({ "level": 10 }))
        );

        writer
            .send(RPC, &request(2, "chip.rpc.Lighting", "Set", json!({ "level": 300 })))
            .unwrap();
        assert_eq!(
            response(reader.read_valid_frame().unwrap()),
            (2, false, Value::Null)
        );

        writer
            .send(RPC, &request(3, "chip.rpc.Lighting", "Get", json!({})))
            .unwrap();
        assert_eq!(
            response(reader.read_valid_frame().unwrap()),
            (3, true, json!({ "level": 10 }))
        );

        writer
            .send(RPC, &request(4, "chip.rpc.Missing", "Get", json!({})))
            .unwrap();
        assert!(!response(reader.read_valid_frame().unwrap()).1);

        drop(writer);
        drop(reader);
        let stats = server.join().unwrap();
        assert_eq!(stats.requests, 4);
    }

    #[test]
    fn ignored_requests_get_no_response() {
        let sim = Simulator::new().automation_service("Sleepy", |_, _| ServiceReply::Ignore);
        let (device, host) = LinkStream::pair().unwrap();
        let server = thread::spawn(move || sim.serve(device).unwrap());

        let mut writer = FrameWriter::new(host.try_clone().unwrap());
        writer
            .send(RPC, &request(7, "chip.rpc.Sleepy", "Nap", json!({})))
            .unwrap();
        writer
            .send(RPC, &request(8, "pw.rpc.EchoService", "Echo", json!({ "msg": "hi" })))
            .unwrap();

        let mut reader = FrameReader::new(host);
        assert_eq!(
            response(reader.read_valid_frame().unwrap()),
            (8, true, json!({ "msg": "hi" }))
        );
        assert!(!reader.get_ref().wait_readable(Duration::from_millis(50)).unwrap());

        drop(writer);
        drop(reader);
        assert_eq!(server.join().unwrap().requests, 2);
    }
}
