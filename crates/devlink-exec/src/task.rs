use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Placeholder rendered for a task that produced no result.
pub const NO_RESULT: &str = "< No result received >";

/// Failure kind synthesized for a task that reported nothing.
pub const NO_RESULT_KIND: &str = "NoResultReceivedError";

const NO_RESULT_MESSAGE: &str = "Did not receive any results from the process.";

/// One unit of work for the executor.
///
/// Everything here crosses a process boundary as JSON, so a task is named
/// by its registered entry point rather than referenced directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub entry_point: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl TaskSpec {
    pub fn new(entry_point: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }
}

/// An error raised by a task, reduced to its kind and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: String,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The failure recorded for a task whose process reported nothing.
    pub fn no_result() -> Self {
        Self::new(NO_RESULT_KIND, NO_RESULT_MESSAGE)
    }

    pub fn is_no_result(&self) -> bool {
        self.kind == NO_RESULT_KIND
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// Lets tasks use `?` on any error type; the kind is the error's type name.
impl<E: std::error::Error> From<E> for TaskFailure {
    fn from(err: E) -> Self {
        Self::new(short_type_name::<E>(), err.to_string())
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// What a task slot holds on the result side.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult {
    /// The value the task returned.
    Returned(Value),
    /// The task failed, hung or crashed.
    NoResult,
}

impl TaskResult {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Returned(value) => Some(value),
            Self::NoResult => None,
        }
    }

    pub fn is_no_result(&self) -> bool {
        matches!(self, Self::NoResult)
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Returned(value) => write!(f, "{value}"),
            Self::NoResult => f.write_str(NO_RESULT),
        }
    }
}

impl Serialize for TaskResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Returned(value) => value.serialize(serializer),
            Self::NoResult => serializer.serialize_str(NO_RESULT),
        }
    }
}

/// Results and errors of a batch, both in submission order.
///
/// `results[i]` and `errors[i]` describe the i-th task spec. A slot with a
/// returned value has no error; every other slot has one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<TaskResult>,
    pub errors: Vec<Option<TaskFailure>>,
}

impl BatchOutcome {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Whether every task returned without error.
    pub fn is_success(&self) -> bool {
        self.errors.iter().all(Option::is_none)
    }

    /// Failed slots with their index.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &TaskFailure)> {
        self.errors
            .iter()
            .enumerate()
            .filter_map(|(index, error)| error.as_ref().map(|failure| (index, failure)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("device went away")]
    struct DeviceGone;

    #[test]
    fn failure_kind_is_short_type_name() {
        let failure = TaskFailure::from(DeviceGone);
        assert_eq!(failure.kind, "DeviceGone");
        assert_eq!(failure.message, "device went away");

        let io = TaskFailure::from(std::io::Error::other("disk full"));
        assert_eq!(io.kind, "Error");
        assert_eq!(io.to_string(), "Error: disk full");
    }

    #[test]
    fn question_mark_converts_errors() {
        fn parse(text: &str) -> Result<Value, TaskFailure> {
            let n: u32 = text.parse()?;
            Ok(Value::from(n))
        }
        assert_eq!(parse("7").unwrap(), 7);
        assert_eq!(parse("x").unwrap_err().kind, "ParseIntError");
    }

    #[test]
    fn no_result_renders_placeholder() {
        assert_eq!(TaskResult::NoResult.to_string(), NO_RESULT);
        assert_eq!(
            serde_json::to_value(TaskResult::NoResult).unwrap(),
            Value::from(NO_RESULT)
        );
        assert_eq!(
            serde_json::to_value(TaskResult::Returned(Value::from(3))).unwrap(),
            Value::from(3)
        );
    }

    #[test]
    fn spec_round_trips_as_json() {
        let spec = TaskSpec::new("rpc")
            .arg("unix:/tmp/dev.sock")
            .kwarg("level", 10);
        let json = serde_json::to_string(&spec).unwrap();
        let back: TaskSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);

        let minimal: TaskSpec = serde_json::from_str(r#"{"entry_point":"sleep"}"#).unwrap();
        assert!(minimal.args.is_empty() && minimal.kwargs.is_empty());
    }

    #[test]
    fn outcome_lists_failures_by_index() {
        let outcome = BatchOutcome {
            results: vec![
                TaskResult::Returned(Value::Null),
                TaskResult::NoResult,
            ],
            errors: vec![None, Some(TaskFailure::no_result())],
        };
        assert!(!outcome.is_success());
        let failures: Vec<_> = outcome.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 1);
        assert!(failures[0].1.is_no_result());
    }
}
