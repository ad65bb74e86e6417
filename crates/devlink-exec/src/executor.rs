use std::time::{Duration, Instant};

use tracing::{error, info, info_span};

use crate::collector::{task_channels, ExecConfig, ProcessRecord, Resolution, ResultCollector};
use crate::error::{ExecError, Result};
use crate::spawner::Spawner;
use crate::task::{BatchOutcome, TaskFailure, TaskSpec};

const SPAWN_ERROR: &str = "SpawnError";

/// What `execute` does when a task fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Return [`ExecError::TaskFailures`] if any slot holds an error.
    #[default]
    Raise,
    /// Return the outcome with errors in their slots.
    Collect,
}

/// Runs task specs in parallel, one process each, under a shared deadline.
#[derive(Debug, Clone)]
pub struct Executor {
    spawner: Spawner,
    collector: ResultCollector,
}

impl Executor {
    pub fn new(spawner: Spawner, config: ExecConfig) -> Self {
        Self {
            spawner,
            collector: ResultCollector::new(config),
        }
    }

    /// Run every spec concurrently and collect results and errors in spec
    /// order.
    ///
    /// `timeout` bounds the whole batch. Processes still running when it
    /// expires are terminated, then killed, and their slots report
    /// `NoResultReceivedError` unless they managed to report first.
    pub fn execute(
        &self,
        specs: &[TaskSpec],
        timeout: Duration,
        policy: ErrorPolicy,
    ) -> Result<BatchOutcome> {
        let span = info_span!("execute", tasks = specs.len());
        let _entered = span.enter();

        let (sender, receiver) = task_channels();
        let deadline = Instant::now() + timeout;

        let mut records = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            match self.spawner.spawn(index, spec, &sender) {
                Ok(handle) => records.push(ProcessRecord {
                    index,
                    handle,
                    deadline,
                }),
                Err(err) => {
                    error!(task = index, error = %err, "failed to launch task");
                    sender.error(index, TaskFailure::new(SPAWN_ERROR, err.to_string()));
                }
            }
        }
        // Only the report readers may keep the channels open now.
        drop(sender);

        let resolutions = self.collector.await_all(&mut records);
        let escalated = resolutions
            .iter()
            .filter(|r| !matches!(r, Resolution::Exited(_)))
            .count();

        let outcome = self.collector.reconcile(specs.len(), receiver);
        let failed = outcome.failures().count();
        info!(failed, escalated, "batch complete");

        match policy {
            ErrorPolicy::Raise if failed > 0 => Err(ExecError::TaskFailures {
                failures: outcome
                    .failures()
                    .map(|(index, failure)| (index, failure.clone()))
                    .collect(),
            }),
            _ => Ok(outcome),
        }
    }
}
