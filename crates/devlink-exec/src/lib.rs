//! Parallel device task execution.
//!
//! Each [`TaskSpec`] runs in its own OS process under one shared deadline.
//! Processes that outlive it are escalated from SIGTERM to SIGKILL. Results
//! and errors come back over index-tagged channels and are returned in spec
//! order, one slot per task, whatever happened to the process.
//!
//! Task processes are the worker program re-executed in worker mode; see
//! [`worker`]. Task code reaches devices through the [`Session`] it is
//! handed, and must not share a link with the parent: close it there first.

pub mod collector;
pub mod error;
pub mod executor;
pub mod process;
pub mod registry;
pub mod session;
pub mod spawner;
pub mod task;
pub mod worker;

pub use collector::{
    task_channels, ExecConfig, ProcessRecord, Resolution, ResultCollector, TaskReceiver,
    TaskSender,
};
pub use error::{ExecError, Result};
pub use executor::{ErrorPolicy, Executor};
pub use process::{ChildProcess, ProcessHandle};
pub use registry::{TaskArgs, TaskFn, TaskRegistry};
pub use session::{Session, SessionConfig};
pub use spawner::Spawner;
pub use task::{BatchOutcome, TaskFailure, TaskResult, TaskSpec, NO_RESULT, NO_RESULT_KIND};
pub use worker::{
    is_worker_mode, run_worker, WorkerContext, WorkerMessage, LOG_LEVEL_ENV, TASK_INDEX_ENV,
    WORKER_ENV,
};
