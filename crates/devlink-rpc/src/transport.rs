use std::time::Duration;

use bytes::Bytes;
use devlink_frame::{LOG, RPC};
use devlink_link::{Capabilities, LinkAddress, LinkError, LinkStream};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::log_sink::{LogSink, DEFAULT_LOG_CAPACITY};
use crate::rpc::{RpcChannel, RpcConfig, RpcReply};
use crate::worker::{LinkWorker, WorkerConfig};

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub address: LinkAddress,
    pub worker: WorkerConfig,
    pub rpc: RpcConfig,
    /// Log chunks kept before the oldest is discarded.
    pub log_capacity: usize,
}

impl TransportConfig {
    pub fn new(address: LinkAddress) -> Self {
        Self {
            address,
            worker: WorkerConfig::default(),
            rpc: RpcConfig::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// An open-able connection to one device.
///
/// While open, a background [`LinkWorker`] owns the read side of the link
/// and feeds RPC responses and log text to their consumers. A transport
/// must be closed before another process opens the same device.
pub struct Transport {
    config: TransportConfig,
    capabilities: Capabilities,
    link: Option<LinkStream>,
    worker: LinkWorker,
    rpc: Option<RpcChannel>,
    logs: LogSink,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self::with_capabilities(config, Capabilities::detect())
    }

    /// Create a transport limited to `capabilities`.
    pub fn with_capabilities(config: TransportConfig, capabilities: Capabilities) -> Self {
        let worker = LinkWorker::new(config.worker.clone());
        let logs = LogSink::new(config.log_capacity);
        Self {
            config,
            capabilities,
            link: None,
            worker,
            rpc: None,
            logs,
        }
    }

    pub fn address(&self) -> &LinkAddress {
        &self.config.address
    }

    /// Acquire the link and start the worker.
    pub fn open(&mut self) -> Result<()> {
        if self.link.is_some() {
            return Err(TransportError::AlreadyOpen);
        }
        let address = &self.config.address;
        self.capabilities
            .check(address)
            .map_err(TransportError::LinkUnavailable)?;
        let link = LinkStream::open(address).map_err(TransportError::LinkUnavailable)?;
        link.set_cloexec()?;
        link.lock_exclusive().map_err(|err| match err {
            LinkError::Busy { .. } => TransportError::LinkUnavailable(err),
            other => TransportError::Link(other),
        })?;

        if let Err(err) = self.start(&link) {
            if let Err(unlock) = link.unlock() {
                warn!(error = %unlock, "failed to release link after open failure");
            }
            return Err(err);
        }

        info!(link = %self.config.address, "transport open");
        self.link = Some(link);
        Ok(())
    }

    fn start(&mut self, link: &LinkStream) -> Result<()> {
        // A worker left over from a failed close must be gone first.
        self.worker.stop()?;
        let rpc = RpcChannel::new(link.try_clone()?, self.config.rpc.clone());
        self.logs = LogSink::new(self.config.log_capacity);

        self.worker.clear_handlers();
        self.worker.register(RPC, rpc.handler());
        self.worker.register(LOG, self.logs.handler());
        self.worker.start(link.try_clone()?)?;

        self.rpc = Some(rpc);
        Ok(())
    }

    /// Whether the link is held and the worker is running.
    pub fn is_open(&self) -> bool {
        self.link.is_some() && self.worker.is_alive()
    }

    /// Stop the worker and release the link.
    ///
    /// Both steps are attempted even if one fails. Closing a closed
    /// transport is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };

        if let Some(rpc) = self.rpc.take() {
            rpc.fail_pending();
        }
        let worker = self.worker.stop().err();
        // Wake the worker's blocking read if it outlived the join.
        if worker.is_some() {
            if let Err(err) = link.shutdown() {
                debug!(error = %err, "link shutdown failed");
            }
        }
        let unlock = link.unlock().err();
        drop(link);

        if worker.is_none() && unlock.is_none() {
            info!(link = %self.config.address, "transport closed");
            return Ok(());
        }
        Err(TransportError::Close {
            worker,
            link: unlock,
        })
    }

    /// Call `method` on `service` in the configured namespace.
    pub fn call(&self, service: &str, method: &str, kwargs: impl Serialize) -> Result<RpcReply> {
        Ok(self.rpc()?.call(service, method, kwargs)?)
    }

    /// Round-trip `msg` through the device's echo service.
    pub fn echo(&self, msg: &str) -> Result<(bool, String)> {
        Ok(self.rpc()?.echo(msg)?)
    }

    /// The RPC channel of the open link.
    pub fn rpc(&self) -> Result<&RpcChannel> {
        self.rpc.as_ref().ok_or(TransportError::NotOpen)
    }

    /// Next chunk of device log text, or empty bytes if none arrives within
    /// `timeout` or the transport is closed.
    pub fn read(&self, timeout: Duration) -> Bytes {
        if self.link.is_none() {
            return Bytes::new();
        }
        self.logs.read(timeout)
    }

    /// The log sink of the current (or last) open period.
    pub fn log_sink(&self) -> &LogSink {
        &self.logs
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "transport close at drop failed");
        }
    }
}
