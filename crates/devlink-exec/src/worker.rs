//! Child side of the executor.
//!
//! A task process is the worker program re-executed with [`WORKER_ENV`]
//! set. It reads one [`TaskSpec`] as JSON from stdin, runs the registered
//! entry point with a fresh [`Session`], and reports exactly one
//! [`WorkerMessage`] line on stdout.

use std::any::Any;
use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ExecError, Result};
use crate::registry::{TaskArgs, TaskRegistry};
use crate::session::{Session, SessionConfig};
use crate::task::{TaskFailure, TaskSpec};

/// Set (to any value) in the environment of task processes.
pub const WORKER_ENV: &str = "DEVLINK_WORKER";
/// Index of the task within its batch.
pub const TASK_INDEX_ENV: &str = "DEVLINK_TASK_INDEX";
/// Log level for the task process.
pub const LOG_LEVEL_ENV: &str = "DEVLINK_LOG_LEVEL";

const UNKNOWN_TASK: &str = "UnknownTaskError";
const PANIC: &str = "Panic";

/// One line of task-process output, tagged with the task index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Result {
        index: usize,
        value: Value,
    },
    Error {
        index: usize,
        kind: String,
        message: String,
    },
}

impl WorkerMessage {
    pub fn failed(index: usize, failure: TaskFailure) -> Self {
        Self::Error {
            index,
            kind: failure.kind,
            message: failure.message,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Result { index, .. } | Self::Error { index, .. } => *index,
        }
    }
}

/// Whether this process was started as a task process.
pub fn is_worker_mode() -> bool {
    std::env::var_os(WORKER_ENV).is_some()
}

/// Run the task process on stdin/stdout. Returns whether the task succeeded.
pub fn run_worker(registry: &TaskRegistry, config: SessionConfig) -> Result<bool> {
    WorkerContext::from_env()?.run(io::stdin(), io::stdout(), registry, config)
}

/// Identity of a task process within its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    pub index: usize,
}

impl WorkerContext {
    pub fn new(index: usize) -> Self {
        Self { index }
    }

    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(TASK_INDEX_ENV)
            .map_err(|_| ExecError::WorkerEnv(format!("{TASK_INDEX_ENV} is not set")))?;
        let index = raw.parse().map_err(|_| {
            ExecError::WorkerEnv(format!("{TASK_INDEX_ENV} is not an index: {raw:?}"))
        })?;
        Ok(Self { index })
    }

    /// Read the spec from `input`, run it, and report on `output`.
    pub fn run(
        &self,
        input: impl Read,
        mut output: impl Write,
        registry: &TaskRegistry,
        config: SessionConfig,
    ) -> Result<bool> {
        let spec: TaskSpec = serde_json::from_reader(input)?;
        let message = match self.execute(&spec, registry, config) {
            Ok(value) => WorkerMessage::Result {
                index: self.index,
                value,
            },
            Err(failure) => {
                warn!(
                    index = self.index,
                    task = %spec.entry_point,
                    failure = %failure,
                    "task failed"
                );
                WorkerMessage::failed(self.index, failure)
            }
        };

        let succeeded = matches!(message, WorkerMessage::Result { .. });
        serde_json::to_writer(&mut output, &message)?;
        output.write_all(b"\n")?;
        output.flush()?;
        Ok(succeeded)
    }

    fn execute(
        &self,
        spec: &TaskSpec,
        registry: &TaskRegistry,
        config: SessionConfig,
    ) -> std::result::Result<Value, TaskFailure> {
        let task = registry.get(&spec.entry_point).ok_or_else(|| {
            TaskFailure::new(
                UNKNOWN_TASK,
                format!("no task registered as {:?}", spec.entry_point),
            )
        })?;
        let args = TaskArgs::from_spec(spec);
        let mut session = Session::for_task(config, self.index);

        info!(index = self.index, task = %spec.entry_point, "task started");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(&mut session, &args)));
        if let Err(err) = session.close() {
            warn!(index = self.index, error = %err, "failed to close task session");
        }
        debug!(index = self.index, "task session closed");

        match outcome {
            Ok(result) => result,
            Err(payload) => Err(TaskFailure::new(PANIC, panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
