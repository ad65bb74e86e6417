use std::fmt::Write as _;

use crate::task::TaskFailure;

/// Errors raised by the executor and the worker-mode entry point.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// A task process could not be started.
    #[error("failed to spawn task {index}: {source}")]
    Spawn {
        index: usize,
        source: std::io::Error,
    },

    /// The worker-mode environment is missing or malformed.
    #[error("invalid worker environment: {0}")]
    WorkerEnv(String),

    /// At least one task failed under `ErrorPolicy::Raise`.
    #[error("{}", describe_failures(.failures))]
    TaskFailures { failures: Vec<(usize, TaskFailure)> },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn describe_failures(failures: &[(usize, TaskFailure)]) -> String {
    let mut out = String::from("encountered errors in parallel processes:");
    for (index, failure) in failures {
        let _ = write!(out, " [{index}] {failure};");
    }
    out.pop();
    out
}

pub type Result<T> = std::result::Result<T, ExecError>;
