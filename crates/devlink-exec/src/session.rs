use devlink_link::LinkAddress;
use devlink_rpc::{RpcConfig, Transport, TransportConfig, TransportError, WorkerConfig};
use tracing::{debug, warn};

/// Settings applied to every transport a session opens.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub worker: WorkerConfig,
    pub rpc: RpcConfig,
    pub log_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            rpc: RpcConfig::default(),
            log_capacity: devlink_rpc::DEFAULT_LOG_CAPACITY,
        }
    }
}

impl SessionConfig {
    fn transport_config(&self, address: LinkAddress) -> TransportConfig {
        TransportConfig {
            address,
            worker: self.worker.clone(),
            rpc: self.rpc.clone(),
            log_capacity: self.log_capacity,
        }
    }
}

/// Per-task device access.
///
/// Every task process gets a fresh session as its first argument. Transports
/// opened through it belong to the task; whatever is still open when the
/// task returns is closed by [`close`](Self::close).
pub struct Session {
    config: SessionConfig,
    task_index: Option<usize>,
    transports: Vec<Transport>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            task_index: None,
            transports: Vec::new(),
        }
    }

    /// Session for the task at `index` of a batch.
    pub fn for_task(config: SessionConfig, index: usize) -> Self {
        let mut session = Self::new(config);
        session.task_index = Some(index);
        session
    }

    pub fn task_index(&self) -> Option<usize> {
        self.task_index
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open transport to `address`, reusing one this session already has
    /// open.
    pub fn open(&mut self, address: &LinkAddress) -> Result<&mut Transport, TransportError> {
        if let Some(position) = self
            .transports
            .iter()
            .position(|t| t.address() == address && t.is_open())
        {
            return Ok(&mut self.transports[position]);
        }

        // Drop closed transports for the same link before reopening it.
        self.transports.retain(|t| t.address() != address);

        let mut transport = Transport::new(self.config.transport_config(address.clone()));
        transport.open()?;
        debug!(link = %address, task = ?self.task_index, "session opened link");
        self.transports.push(transport);
        let last = self.transports.len() - 1;
        Ok(&mut self.transports[last])
    }

    /// Close and forget the transport to `address`, if any.
    pub fn release(&mut self, address: &LinkAddress) -> Result<(), TransportError> {
        let Some(position) = self.transports.iter().position(|t| t.address() == address) else {
            return Ok(());
        };
        let mut transport = self.transports.remove(position);
        transport.close()
    }

    /// Number of transports currently open.
    pub fn open_count(&self) -> usize {
        self.transports.iter().filter(|t| t.is_open()).count()
    }

    /// Close every transport. Failures are logged; the first one is
    /// returned after all transports were attempted.
    pub fn close(&mut self) -> Result<(), TransportError> {
        let mut first = None;
        for mut transport in self.transports.drain(..) {
            if let Err(err) = transport.close() {
                warn!(link = %transport.address(), error = %err, "failed to close link");
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use devlink_link::LinkListener;
    use devlink_rpc::Simulator;

    use super::*;

    #[test]
    fn open_reuses_and_close_releases() {
        let dir = std::env::temp_dir().join(format!(
            "devlink-exec-session-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let socket = dir.join("device.sock");
        let listener = LinkListener::bind(&socket).unwrap();
        let server = thread::spawn(move || Simulator::new().run(&listener, Some(1)).unwrap());

        let address = LinkAddress::socket(&socket);
        let mut session = Session::for_task(SessionConfig::default(), 4);
        assert_eq!(session.task_index(), Some(4));

        session.open(&address).unwrap();
        // Second open reuses the link; the simulator accepts only one
        // connection.
        let transport = session.open(&address).unwrap();
        assert_eq!(transport.echo("hi").unwrap(), (true, "hi".to_string()));
        assert_eq!(session.open_count(), 1);

        session.close().unwrap();
        assert_eq!(session.open_count(), 0);
        server.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unreachable_link_is_reported() {
        let mut session = Session::new(SessionConfig::default());
        let address = LinkAddress::socket("/nonexistent/devlink-session.sock");
        assert!(matches!(
            session.open(&address),
            Err(TransportError::LinkUnavailable(_))
        ));
        assert_eq!(session.open_count(), 0);
        session.close().unwrap();
    }
}
