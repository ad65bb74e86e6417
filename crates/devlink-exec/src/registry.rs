use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::session::Session;
use crate::task::{TaskFailure, TaskSpec};

const ARGUMENT_ERROR: &str = "ArgumentError";

/// Signature of a registered task.
///
/// The session is fresh for every task; anything the task opens through it
/// is closed once the task returns.
pub type TaskFn = fn(&mut Session, &TaskArgs) -> Result<Value, TaskFailure>;

/// Positional and keyword arguments of one task invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl TaskArgs {
    pub fn from_spec(spec: &TaskSpec) -> Self {
        Self {
            args: spec.args.clone(),
            kwargs: spec.kwargs.clone(),
        }
    }

    /// Argument passed by keyword `name` or, failing that, at `position`.
    pub fn get<T: DeserializeOwned>(&self, position: usize, name: &str) -> Result<Option<T>, TaskFailure> {
        let value = self.kwargs.get(name).or_else(|| self.args.get(position));
        match value {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|err| {
                    TaskFailure::new(ARGUMENT_ERROR, format!("argument {name:?}: {err}"))
                }),
        }
    }

    /// Like [`get`](Self::get) but the argument must be present.
    pub fn require<T: DeserializeOwned>(&self, position: usize, name: &str) -> Result<T, TaskFailure> {
        self.get(position, name)?.ok_or_else(|| {
            TaskFailure::new(ARGUMENT_ERROR, format!("missing required argument {name:?}"))
        })
    }

    /// Keyword arguments not in `consumed`, for forwarding.
    pub fn remaining_kwargs(&self, consumed: &[&str]) -> Map<String, Value> {
        self.kwargs
            .iter()
            .filter(|(name, _)| !consumed.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// Task entry points by name.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, TaskFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, task: TaskFn) -> &mut Self {
        self.tasks.insert(name.into(), task);
        self
    }

    pub fn with(mut self, name: impl Into<String>, task: TaskFn) -> Self {
        self.register(name, task);
        self
    }

    pub fn get(&self, name: &str) -> Option<TaskFn> {
        self.tasks.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }
}
