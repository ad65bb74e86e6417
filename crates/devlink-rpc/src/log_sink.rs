use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use devlink_frame::Frame;
use tracing::{debug, warn};

use crate::worker::{FrameHandler, HandlerError};

/// Default number of queued log chunks.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// Bounded FIFO of device log chunks.
///
/// The worker pushes, callers read. A full sink discards its oldest chunk
/// rather than blocking the worker.
#[derive(Clone)]
pub struct LogSink {
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
    dropped: Arc<AtomicU64>,
}

impl LogSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue a chunk, discarding the oldest one if the sink is full.
    pub fn push(&self, chunk: Bytes) {
        let mut chunk = chunk;
        loop {
            match self.tx.try_send(chunk) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if self.rx.try_recv().is_ok() {
                        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if total.is_power_of_two() {
                            warn!(dropped = total, "log sink full, discarding oldest chunks");
                        }
                    }
                    chunk = rejected;
                }
                // Both ends live in `self`; unreachable in practice.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Next queued chunk, or empty bytes once `timeout` elapses.
    pub fn read(&self, timeout: Duration) -> Bytes {
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => Bytes::new(),
        }
    }

    /// Discard everything queued.
    pub fn clear(&self) {
        let discarded = self.rx.try_iter().count();
        if discarded > 0 {
            debug!(discarded, "cleared log sink");
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Chunks discarded because the sink was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Frame handler feeding this sink.
    pub fn handler(&self) -> LogHandler {
        LogHandler { sink: self.clone() }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// Handler for the `LOG` address. Each payload becomes one chunk ending in
/// a newline.
pub struct LogHandler {
    sink: LogSink,
}

impl FrameHandler for LogHandler {
    fn handle(&mut self, frame: &Frame) -> Result<(), HandlerError> {
        let mut line = BytesMut::with_capacity(frame.payload.len() + 1);
        line.extend_from_slice(&frame.payload);
        line.put_u8(b'\n');
        self.sink.push(line.freeze());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use devlink_frame::LOG;

    use super::*;

    #[test]
    fn read_returns_chunks_in_arrival_order() {
        let sink = LogSink::new(8);
        sink.push(Bytes::from_static(b"first"));
        sink.push(Bytes::from_static(b"second"));

        assert_eq!(sink.read(Duration::from_millis(10)), "first");
        assert_eq!(sink.read(Duration::from_millis(10)), "second");
    }

    #[test]
    fn empty_read_times_out_with_empty_bytes() {
        let sink = LogSink::new(8);
        let start = Instant::now();
        assert!(sink.read(Duration::from_millis(50)).is_empty());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn full_sink_discards_oldest() {
        let sink = LogSink::new(2);
        for chunk in ["a", "b", "c"] {
            sink.push(Bytes::from(chunk));
        }

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.dropped(), 1);
        assert_eq!(sink.read(Duration::ZERO), "b");
        assert_eq!(sink.read(Duration::ZERO), "c");
    }

    #[test]
    fn handler_appends_newline() {
        let sink = LogSink::default();
        let mut handler = sink.handler();
        handler
            .handle(&Frame::new(LOG, Bytes::from_static(b"boot ok")))
            .unwrap();
        assert_eq!(sink.read(Duration::ZERO), "boot ok\n");
    }

    #[test]
    fn reader_wakes_on_push_from_other_thread() {
        let sink = LogSink::new(4);
        let producer = sink.clone();
        let pusher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(Bytes::from_static(b"late"));
        });

        assert_eq!(sink.read(Duration::from_secs(2)), "late");
        pusher.join().unwrap();
    }

    #[test]
    fn clear_discards_queue() {
        let sink = LogSink::new(4);
        sink.push(Bytes::from_static(b"stale"));
        sink.clear();
        assert!(sink.is_empty());
    }
}
