use std::process::ExitStatus;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::process::ProcessHandle;
use crate::task::{BatchOutcome, TaskFailure, TaskResult};
use crate::worker::WorkerMessage;

/// Escalation and draining intervals.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Wait after SIGTERM before escalating to SIGKILL. Default: 3 s.
    pub terminate_grace: Duration,
    /// Wait after SIGKILL before giving up on a process. Default: 3 s.
    pub kill_grace: Duration,
    /// Wait for report readers to finish before reading what is left
    /// without blocking. Default: 1 s.
    pub drain_grace: Duration,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            terminate_grace: Duration::from_secs(3),
            kill_grace: Duration::from_secs(3),
            drain_grace: Duration::from_secs(1),
        }
    }
}

/// Sending half of the results and errors channels.
#[derive(Debug, Clone)]
pub struct TaskSender {
    results: Sender<(usize, Value)>,
    errors: Sender<(usize, TaskFailure)>,
}

impl TaskSender {
    /// Route a worker report to its channel.
    pub fn send(&self, message: WorkerMessage) {
        match message {
            WorkerMessage::Result { index, value } => self.result(index, value),
            WorkerMessage::Error {
                index,
                kind,
                message,
            } => self.error(index, TaskFailure::new(kind, message)),
        }
    }

    pub fn result(&self, index: usize, value: Value) {
        // The receiver outlives every sender until reconciliation.
        let _ = self.results.send((index, value));
    }

    pub fn error(&self, index: usize, failure: TaskFailure) {
        let _ = self.errors.send((index, failure));
    }
}

/// Receiving half of the results and errors channels.
#[derive(Debug)]
pub struct TaskReceiver {
    results: Receiver<(usize, Value)>,
    errors: Receiver<(usize, TaskFailure)>,
}

impl TaskReceiver {
    #[cfg(test)]
    pub(crate) fn into_vecs(self) -> (Vec<(usize, Value)>, Vec<(usize, TaskFailure)>) {
        (
            self.results.try_iter().collect(),
            self.errors.try_iter().collect(),
        )
    }
}

/// Index-tagged results and errors channels shared by every task of a batch.
pub fn task_channels() -> (TaskSender, TaskReceiver) {
    let (results_tx, results_rx) = channel::unbounded();
    let (errors_tx, errors_rx) = channel::unbounded();
    (
        TaskSender {
            results: results_tx,
            errors: errors_tx,
        },
        TaskReceiver {
            results: results_rx,
            errors: errors_rx,
        },
    )
}

/// One launched task process.
#[derive(Debug)]
pub struct ProcessRecord<P> {
    pub index: usize,
    pub handle: P,
    pub deadline: Instant,
}

/// How a process came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Exited on its own before the deadline.
    Exited(ExitStatus),
    /// Exited after SIGTERM.
    Terminated,
    /// Exited after SIGKILL.
    Killed,
    /// Still running after SIGKILL and the kill grace.
    Unresponsive,
}

/// Awaits task processes against the shared deadline and assembles the
/// ordered outcome.
#[derive(Debug, Clone, Default)]
pub struct ResultCollector {
    config: ExecConfig,
}

impl ResultCollector {
    pub fn new(config: ExecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Await every record until its deadline, then escalate on the overdue
    /// ones as a group: SIGTERM to all, one shared terminate grace, SIGKILL
    /// to the survivors, one shared kill grace.
    pub fn await_all<P: ProcessHandle>(&self, records: &mut [ProcessRecord<P>]) -> Vec<Resolution> {
        let mut resolutions = vec![Resolution::Unresponsive; records.len()];
        let mut overdue = Vec::new();
        for (slot, record) in records.iter_mut().enumerate() {
            let remaining = record.deadline.saturating_duration_since(Instant::now());
            match wait(record, remaining) {
                Some(status) => {
                    debug!(task = record.index, %status, "task process exited");
                    resolutions[slot] = Resolution::Exited(status);
                }
                None => overdue.push(slot),
            }
        }
        if overdue.is_empty() {
            return resolutions;
        }

        for &slot in &overdue {
            let record = &mut records[slot];
            warn!(
                task = record.index,
                pid = record.handle.id(),
                "task process missed the deadline, terminating"
            );
            if let Err(err) = record.handle.terminate() {
                warn!(task = record.index, error = %err, "failed to terminate task process");
            }
        }
        let overdue = reap(
            records,
            overdue,
            self.config.terminate_grace,
            Resolution::Terminated,
            &mut resolutions,
        );

        for &slot in &overdue {
            let record = &mut records[slot];
            warn!(task = record.index, pid = record.handle.id(), "task process ignored SIGTERM, killing");
            if let Err(err) = record.handle.kill() {
                warn!(task = record.index, error = %err, "failed to kill task process");
            }
        }
        let survivors = reap(
            records,
            overdue,
            self.config.kill_grace,
            Resolution::Killed,
            &mut resolutions,
        );

        for slot in survivors {
            let record = &records[slot];
            error!(task = record.index, pid = record.handle.id(), "task process survived SIGKILL");
        }
        resolutions
    }

    /// Drain both channels and fill one slot per task, in index order.
    ///
    /// Every sender should be gone (or about to be) when this is called:
    /// draining waits up to the drain grace for them to disconnect, then
    /// takes whatever is queued without blocking.
    pub fn reconcile(&self, count: usize, receiver: TaskReceiver) -> BatchOutcome {
        let deadline = Instant::now() + self.config.drain_grace;
        let mut results = vec![TaskResult::NoResult; count];
        let mut errors: Vec<Option<TaskFailure>> = vec![None; count];

        for (index, value) in drain(&receiver.results, deadline) {
            match results.get_mut(index) {
                Some(slot) if slot.is_no_result() => *slot = TaskResult::Returned(value),
                Some(_) => warn!(task = index, "duplicate result ignored"),
                None => warn!(task = index, count, "result for unknown task ignored"),
            }
        }
        for (index, failure) in drain(&receiver.errors, deadline) {
            match errors.get_mut(index) {
                Some(slot) if slot.is_none() => *slot = Some(failure),
                Some(_) => warn!(task = index, "duplicate error ignored"),
                None => warn!(task = index, count, "error for unknown task ignored"),
            }
        }

        // Each slot holds exactly one of a result or an error.
        for (index, (result, error)) in results.iter_mut().zip(errors.iter_mut()).enumerate() {
            match (result.is_no_result(), error.is_some()) {
                (true, false) => {
                    debug!(task = index, "no report received");
                    *error = Some(TaskFailure::no_result());
                }
                (false, true) => {
                    warn!(task = index, "task reported both a result and an error, keeping the error");
                    *result = TaskResult::NoResult;
                }
                _ => {}
            }
        }

        BatchOutcome { results, errors }
    }
}

fn wait<P: ProcessHandle>(record: &mut ProcessRecord<P>, timeout: Duration) -> Option<ExitStatus> {
    match record.handle.wait_timeout(timeout) {
        Ok(status) => status,
        Err(err) => {
            warn!(task = record.index, error = %err, "waiting on task process failed");
            None
        }
    }
}

/// Wait out one grace period shared by every slot in `slots`, marking those
/// that exit as `resolved`. Returns the slots still running.
fn reap<P: ProcessHandle>(
    records: &mut [ProcessRecord<P>],
    slots: Vec<usize>,
    grace: Duration,
    resolved: Resolution,
    resolutions: &mut [Resolution],
) -> Vec<usize> {
    let deadline = Instant::now() + grace;
    slots
        .into_iter()
        .filter(|&slot| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if wait(&mut records[slot], remaining).is_some() {
                resolutions[slot] = resolved;
                false
            } else {
                true
            }
        })
        .collect()
}

fn drain<T>(rx: &Receiver<T>, deadline: Instant) -> Vec<T> {
    let mut drained = Vec::new();
    loop {
        match rx.recv_deadline(deadline) {
            Ok(item) => drained.push(item),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                drained.extend(rx.try_iter());
                break;
            }
        }
    }
    drained
}
