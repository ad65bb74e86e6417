//! Concurrent device I/O over a single link.
//!
//! A [`Transport`] owns one open link and one background [`LinkWorker`].
//! The worker decodes frames and routes them by address: RPC responses to
//! the [`RpcChannel`], device log text to the [`LogSink`]. Callers see a
//! blocking `call` and a timeout-bounded `read`.

pub mod error;
pub mod log_sink;
pub mod message;
pub mod rpc;
pub mod sim;
pub mod transport;
pub mod worker;

pub use error::{Result, RpcError, TransportError, WorkerError};
pub use log_sink::{LogHandler, LogSink, DEFAULT_LOG_CAPACITY};
pub use message::{RpcPacket, AUTOMATION_NAMESPACE, DIAGNOSTIC_NAMESPACE, ECHO_METHOD, ECHO_SERVICE};
pub use rpc::{RpcChannel, RpcConfig, RpcHandler, RpcReply, TimeoutPolicy};
pub use sim::{ServiceReply, SimStats, Simulator};
pub use transport::{Transport, TransportConfig};
pub use worker::{FrameHandler, HandlerError, LinkWorker, WorkerConfig};
