use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use devlink_frame::{address_name, Frame, FrameConfig, FrameDecoder};
use devlink_link::LinkStream;
use tracing::{debug, error, info, trace, warn};

use crate::error::WorkerError;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Error returned by a [`FrameHandler`]; logged by the worker, never fatal.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives the frames addressed to one logical channel.
///
/// Handlers run synchronously on the worker thread and must not block for
/// long: while one runs, no other frame or log text is delivered.
pub trait FrameHandler: Send {
    /// Handle one valid frame.
    fn handle(&mut self, frame: &Frame) -> Result<(), HandlerError>;

    /// Called once when the worker loop exits for any reason.
    fn on_close(&mut self) {}
}

type HandlerMap = HashMap<u8, Box<dyn FrameHandler>>;

/// Link worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound on a single readiness wait. This is the maximum latency
    /// between a stop request and loop exit. Default: 100 ms.
    pub poll_interval: Duration,
    /// How long `stop` waits for the thread to exit. Default: 1 s.
    pub join_timeout: Duration,
    /// Bytes requested per read. Default: 4 KiB.
    pub read_chunk_size: usize,
    /// Decoder limits.
    pub frame: FrameConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            join_timeout: Duration::from_secs(1),
            read_chunk_size: 4 * 1024,
            frame: FrameConfig::default(),
        }
    }
}

/// Background read/dispatch loop for one link.
///
/// One thread both reads and dispatches, so frames reach handlers in wire
/// order. Handlers are registered per address; frames for any other address
/// are logged and dropped.
pub struct LinkWorker {
    config: WorkerConfig,
    handlers: Arc<Mutex<HandlerMap>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl LinkWorker {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Route frames for `address` to `handler`, replacing any previous one.
    pub fn register(&self, address: u8, handler: impl FrameHandler + 'static) {
        if lock(&self.handlers)
            .insert(address, Box::new(handler))
            .is_some()
        {
            debug!(address, "replaced frame handler");
        }
    }

    /// Remove every registered handler.
    pub fn clear_handlers(&self) {
        lock(&self.handlers).clear();
    }

    /// Start the worker on `link`.
    ///
    /// Returns `Ok(false)` without touching the running worker if one is
    /// already alive; `link` is dropped in that case.
    pub fn start(&mut self, link: LinkStream) -> Result<bool, WorkerError> {
        if let Some(handle) = &self.thread {
            if !handle.is_finished() {
                debug!("link worker already running");
                return Ok(false);
            }
            // Reap a worker that exited on its own.
            if let Some(handle) = self.thread.take() {
                let _ = handle.join();
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);
        let handlers = Arc::clone(&self.handlers);
        let config = self.config.clone();
        let medium = link.medium();

        let handle = thread::Builder::new()
            .name("devlink-worker".to_string())
            .spawn(move || run_loop(link, &handlers, &stop, &config))
            .map_err(WorkerError::Spawn)?;
        self.thread = Some(handle);

        info!(medium, "link worker started");
        Ok(true)
    }

    /// Stop the worker and wait up to the join timeout for it to exit.
    ///
    /// A worker that outlives the timeout is reported as
    /// [`WorkerError::JoinTimeout`]; the handle is kept so a later `stop`
    /// can retry.
    pub fn stop(&mut self) -> Result<(), WorkerError> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };
        self.stop.store(true, Ordering::Release);

        let deadline = Instant::now() + self.config.join_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                error!(
                    timeout = ?self.config.join_timeout,
                    "link worker failed to join"
                );
                self.thread = Some(handle);
                return Err(WorkerError::JoinTimeout(self.config.join_timeout));
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        handle.join().map_err(|_| WorkerError::Panicked)?;
        debug!("link worker stopped");
        Ok(())
    }

    /// Whether the worker thread is running.
    pub fn is_alive(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for LinkWorker {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "link worker still running at drop");
        }
    }
}

fn lock(handlers: &Mutex<HandlerMap>) -> MutexGuard<'_, HandlerMap> {
    handlers.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_loop(
    mut link: LinkStream,
    handlers: &Mutex<HandlerMap>,
    stop: &AtomicBool,
    config: &WorkerConfig,
) {
    let mut decoder = FrameDecoder::with_config(&config.frame);
    let mut chunk = vec![0u8; config.read_chunk_size.max(1)];

    let reason = loop {
        if stop.load(Ordering::Acquire) {
            break "stop requested";
        }

        match link.wait_readable(config.poll_interval) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                error!(error = %err, "link poll failed");
                break "poll failed";
            }
        }

        let read = match link.read(&mut chunk) {
            Ok(0) => break "link closed by peer",
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                continue;
            }
            Err(err) => {
                error!(error = %err, "link read failed");
                break "read failed";
            }
        };
        trace!(bytes = read, "link data");

        for frame in decoder.feed(&chunk[..read]) {
            dispatch(handlers, &frame);
        }
    };

    info!(reason, "link worker exiting");
    for handler in lock(handlers).values_mut() {
        if panic::catch_unwind(AssertUnwindSafe(|| handler.on_close())).is_err() {
            error!("frame handler panicked while closing");
        }
    }
}

fn dispatch(handlers: &Mutex<HandlerMap>, frame: &Frame) {
    if !frame.valid {
        debug!(address = frame.address, "dropping frame with bad checksum");
        return;
    }

    let mut handlers = lock(handlers);
    let Some(handler) = handlers.get_mut(&frame.address) else {
        warn!(
            address = frame.address,
            size = frame.payload.len(),
            "unhandled frame address"
        );
        return;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(frame))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(
            address = frame.address,
            channel = address_name(frame.address),
            error = %err,
            "frame handler failed"
        ),
        Err(_) => error!(
            address = frame.address,
            channel = address_name(frame.address),
            "frame handler panicked"
        ),
    }
}
